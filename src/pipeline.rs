//! Job processing pipeline
//!
//! Classifies the spooled document, drives the vendor codec page by
//! page, and owns the dither state for raster jobs.  The caller (the
//! printer worker) maps the result onto the job's terminal state:
//! `Canceled` for cooperative cancellation, `aborted` for everything
//! else that fails, `completed` on success.
//!
//! Raster input that is already 1 bit deep is device-ready and goes to
//! the codec untouched (modulo polarity); 8-bit input runs through the
//! dither engine, whose one-line lag and flush call live here, not in
//! the codecs.

use std::fs::File;
use std::io::{BufReader, Read};

use image::ImageReader;
use tracing::{debug, error, info};

use crate::device::Device;
use crate::dither::DitherBuffer;
use crate::drivers::Codec;
use crate::error::JobError;
use crate::job::Job;
use crate::options::JobOptions;
use crate::printer::Printer;
use crate::raster::{PageHeader, RasterReader};

/// Chunk size for raw pass-through copies
const RAW_CHUNK: usize = 65536;

/// Process one job on an open device
pub(crate) fn process_job(
    printer: &Printer,
    job: &Job,
    device: &mut Device,
) -> Result<(), JobError> {
    let format = job.format();
    debug!(job = job.id, %format, "processing job");

    match format.as_str() {
        "image/pwg-raster" | "image/urf" => process_raster(printer, job, device),
        "image/png" => process_png(printer, job, device),
        raw if raw == printer.driver.format => process_raw(job, device),
        other => {
            error!(job = job.id, format = %other, "no codec for format");
            Err(JobError::UnsupportedFormat(other.to_string()))
        }
    }
}

fn spool_file(job: &Job) -> Result<std::path::PathBuf, JobError> {
    job.filename()
        .ok_or_else(|| JobError::MalformedDocument("job has no spooled document".into()))
}

fn prepare_options(printer: &Printer, job: &Job, num_pages: u32) -> JobOptions {
    let mut options = JobOptions::prepare(
        &job.attributes(),
        &printer.attributes(),
        &printer.driver,
        num_pages,
    );
    options.output_path = job.filename().map(|path| path.with_extension("out"));
    options
}

/// Print a PWG/Apple raster document
fn process_raster(printer: &Printer, job: &Job, device: &mut Device) -> Result<(), JobError> {
    let path = spool_file(job)?;
    let file = File::open(&path).map_err(JobError::spool)?;
    let mut reader = RasterReader::new(BufReader::new(file))?;

    let Some(first_header) = reader.next_page()? else {
        return Err(JobError::MalformedDocument("empty raster stream".into()));
    };

    let num_pages = first_header.total_page_count.max(1);
    job.set_impressions(num_pages);

    let options = prepare_options(printer, job, num_pages);
    let mut codec = printer.driver.codec();

    codec.start_job(&options, device)?;

    let mut page = 0u32;
    let mut in_header = first_header;
    loop {
        if job.is_canceled() {
            return Err(JobError::Canceled);
        }

        codec.start_page(&options, device, page)?;
        print_raster_page(job, &options, codec.as_mut(), device, &mut reader, &in_header)?;
        codec.end_page(&options, device, page)?;
        job.add_impression();

        page += 1;
        match reader.next_page()? {
            Some(header) => in_header = header,
            None => break,
        }
    }

    codec.end_job(&options, device)?;
    info!(job = job.id, pages = page, "raster job done");
    Ok(())
}

/// Stream one page's scanlines through the codec
fn print_raster_page(
    job: &Job,
    options: &JobOptions,
    codec: &mut dyn Codec,
    device: &mut Device,
    reader: &mut RasterReader<BufReader<File>>,
    in_header: &PageHeader,
) -> Result<(), JobError> {
    let blank = codec.blank_byte();
    let out_width = options.header.bytes_per_line as usize;
    let mut in_line = vec![0u8; in_header.bytes_per_line as usize];
    let mut out_line = vec![blank; out_width];

    if in_header.bits_per_pixel == 1 {
        // Device-ready input: pass lines through, flipping polarity for
        // white-is-one wire formats.
        let copy = out_width.min(in_line.len());
        for y in 0..in_header.height {
            if job.is_canceled() {
                return Err(JobError::Canceled);
            }
            reader.read_line(&mut in_line)?;

            if blank == 0 {
                out_line[..copy].copy_from_slice(&in_line[..copy]);
            } else {
                for (out, &byte) in out_line[..copy].iter_mut().zip(in_line.iter()) {
                    *out = !byte;
                }
            }
            codec.write_line(options, device, y, &out_line)?;
        }
        return Ok(());
    }

    // Grayscale input is dithered down to 1 bit with a one-line lag; the
    // extra call at y == height flushes the final line.
    let mut dither = DitherBuffer::new(
        &options.dither,
        &options.header,
        in_header,
        blank,
        codec.out_gamma(options.header.x_resolution),
    )?;
    let offset = dither.out_offset();

    for y in 0..=in_header.height {
        if job.is_canceled() {
            return Err(JobError::Canceled);
        }

        let emitted = if y < in_header.height {
            reader.read_line(&mut in_line)?;
            dither.line(y, Some(&in_line))
        } else {
            dither.line(y, None)
        };

        if emitted && offset < out_width {
            out_line.fill(blank);
            let end = (offset + dither.out_width()).min(out_width);
            out_line[offset..end].copy_from_slice(&dither.output()[..end - offset]);
            codec.write_line(options, device, y - 1, &out_line)?;
        }
    }

    Ok(())
}

/// Print a PNG image, scaled and centered into the imageable area
fn process_png(printer: &Printer, job: &Job, device: &mut Device) -> Result<(), JobError> {
    let path = spool_file(job)?;
    let options = prepare_options(printer, job, 1);
    job.set_impressions(options.copies);

    let header = &options.header;
    let xres = i64::from(header.x_resolution);
    let yres = i64::from(header.y_resolution);

    let iwidth =
        i64::from(header.width) - 2 * i64::from(options.media.left_margin) * xres / 2540;
    let iheight =
        i64::from(header.height) - 2 * i64::from(options.media.top_margin) * yres / 2540;
    if iwidth <= 0 || iheight <= 0 {
        return Err(JobError::MalformedDocument("imageable area is empty".into()));
    }
    let (iwidth, iheight) = (iwidth as u32, iheight as u32);

    // Decode over a white background.
    let decoded = ImageReader::open(&path)
        .map_err(JobError::spool)?
        .decode()?;
    let rgba = decoded.to_rgba8();
    let (img_width, img_height) = rgba.dimensions();
    if img_width == 0 || img_height == 0 {
        return Err(JobError::MalformedDocument("zero-size image".into()));
    }

    let mut pixels = vec![0u8; (img_width * img_height) as usize];
    for (pixel, out) in rgba.pixels().zip(pixels.iter_mut()) {
        let [r, g, b, a] = pixel.0;
        let a = u32::from(a);
        let over = |c: u8| (u32::from(c) * a + 255 * (255 - a)) / 255;
        // Rec. 601 luma.
        *out = ((299 * over(r) + 587 * over(g) + 114 * over(b)) / 1000) as u8;
    }

    // Largest aspect-preserving fit, centered.
    let mut xsize = iwidth;
    let mut ysize = (u64::from(xsize) * u64::from(img_height) / u64::from(img_width)) as u32;
    if ysize > iheight {
        ysize = iheight;
        xsize = (u64::from(ysize) * u64::from(img_width) / u64::from(img_height)) as u32;
    }
    let xsize = xsize.max(1);
    let ysize = ysize.max(1);

    let xstart = (header.width - xsize) / 2;
    let xend = xstart + xsize;
    let ystart = (header.height - ysize) / 2;
    let yend = ystart + ysize;

    let xstep = (img_width / xsize) as usize;
    let xmod = (img_width % xsize) as usize;

    debug!(xsize, ysize, xstart, ystart, "image placement");

    let mut codec = printer.driver.codec();
    let blank = codec.blank_byte();
    codec.start_job(&options, device)?;

    let width = header.bytes_per_line as usize;
    let mut line = vec![blank; width];

    for copy in 0..options.copies {
        if job.is_canceled() {
            return Err(JobError::Canceled);
        }

        codec.start_page(&options, device, copy)?;

        // Leading blank space...
        line.fill(blank);
        for y in 0..ystart {
            check_cancel(job)?;
            codec.write_line(&options, device, y, &line)?;
        }

        // The image itself, nearest-neighbour sampled...
        for y in ystart..yend {
            check_cancel(job)?;

            let src_row = (u64::from(y - ystart) * u64::from(img_height) / u64::from(ysize))
                as usize
                * img_width as usize;
            let dline = &options.dither[(y & 15) as usize];

            line.fill(blank);
            let mut src = src_row;
            let mut xerr = 0usize;
            let mut byte = blank;
            let mut bit = 128u8 >> (xstart & 7);
            let mut out_index = (xstart / 8) as usize;

            for x in xstart..xend {
                if pixels[src] <= dline[(x & 15) as usize] {
                    byte ^= bit;
                }

                src += xstep;
                xerr += xmod;
                if xerr >= xsize as usize {
                    xerr -= xsize as usize;
                    src += 1;
                }

                if bit == 1 {
                    line[out_index] = byte;
                    byte = blank;
                    bit = 128;
                    out_index += 1;
                } else {
                    bit >>= 1;
                }
            }
            if bit < 128 {
                line[out_index] = byte;
            }

            codec.write_line(&options, device, y, &line)?;
        }

        // Trailing blank space...
        line.fill(blank);
        for y in yend..header.height {
            check_cancel(job)?;
            codec.write_line(&options, device, y, &line)?;
        }

        codec.end_page(&options, device, copy)?;
        job.add_impression();
    }

    codec.end_job(&options, device)?;
    info!(job = job.id, copies = options.copies, "image job done");
    Ok(())
}

/// Stream a vendor-raw document to the device unchanged
fn process_raw(job: &Job, device: &mut Device) -> Result<(), JobError> {
    let path = spool_file(job)?;
    job.set_impressions(1);

    let mut file = File::open(&path).map_err(JobError::spool)?;
    let mut buffer = vec![0u8; RAW_CHUNK];
    loop {
        if job.is_canceled() {
            return Err(JobError::Canceled);
        }
        let n = file.read(&mut buffer).map_err(JobError::spool)?;
        if n == 0 {
            break;
        }
        device.write_all(&buffer[..n]).map_err(JobError::from)?;
    }

    job.add_impression();
    info!(job = job.id, "raw job done");
    Ok(())
}

fn check_cancel(job: &Job) -> Result<(), JobError> {
    if job.is_canceled() {
        Err(JobError::Canceled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::MemoryTransport;
    use crate::options::{AttrTable, AttrValue};
    use crate::raster::{ColorSpace, RasterWriter};
    use std::io::Write;
    use std::path::Path;

    fn printer(driver: &str) -> Printer {
        Printer::new(
            1,
            "test".into(),
            "file:///dev/null".parse().unwrap(),
            crate::drivers::Driver::new(driver).unwrap(),
            AttrTable::new(),
        )
    }

    fn job_with_file(printer: &Printer, format: &str, path: &Path) -> Job {
        let job = Job::new(1, printer.id, "test", "op", format, AttrTable::new());
        job.set_spooled(path.to_path_buf());
        job
    }

    fn write_bilevel_raster(
        path: &Path,
        width: u32,
        lines: &[Vec<u8>],
        total_pages: u32,
    ) {
        let mut header = PageHeader::for_bilevel(width, lines.len() as u32, 203, 203);
        header.total_page_count = total_pages;
        let mut writer = RasterWriter::new(File::create(path).unwrap());
        writer.write_header(&header).unwrap();
        for line in lines {
            writer.write_line(line).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn blank_zpl_page_end_to_end() {
        // A 4x6 inch page of zeroes becomes the ~DG download plus 1218
        // commas.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1-test.pwg");

        let printer = printer("zpl_4inch-203dpi-dt");
        let lines = vec![vec![0u8; 102]; 1218];
        write_bilevel_raster(&path, 812, &lines, 1);

        let job = job_with_file(&printer, "image/pwg-raster", &path);
        let (mut device, written) = MemoryTransport::device();
        process_job(&printer, &job, &mut device).unwrap();

        let text = String::from_utf8(written.lock().unwrap().clone()).unwrap();
        assert!(text.contains("~DGR:LPRINT.GRF,123627,102,\n"));
        let data_start = text.find("102,\n").unwrap() + 5;
        assert!(text[data_start..].starts_with(&",".repeat(1218)));
        assert_eq!(job.impressions_completed(), 1);
    }

    #[test]
    fn grayscale_input_is_dithered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2-gray.pwg");

        let printer = printer("zpl_4inch-203dpi-dt");

        // 812 wide, 8-bit sGray, all black (0).
        let mut header = PageHeader::for_bilevel(812, 64, 203, 203);
        header.bits_per_color = 8;
        header.bits_per_pixel = 8;
        header.bytes_per_line = 812;
        header.color_space = ColorSpace::SGray;
        let mut writer = RasterWriter::new(File::create(&path).unwrap());
        writer.write_header(&header).unwrap();
        let line = vec![0u8; 812];
        for _ in 0..64 {
            writer.write_line(&line).unwrap();
        }
        writer.finish().unwrap();

        let job = job_with_file(&printer, "image/pwg-raster", &path);
        let (mut device, written) = MemoryTransport::device();
        process_job(&printer, &job, &mut device).unwrap();

        // Solid black lines hex-compress to runs of 'F' (CC), not ','.
        let text = String::from_utf8(written.lock().unwrap().clone()).unwrap();
        let data_start = text.find("102,\n").unwrap() + 5;
        assert!(text[data_start..].contains('F') || text[data_start..].contains(':'));
    }

    #[test]
    fn cancel_mid_page_stops_cleanly() {
        // Cancel after 500 of 1000 lines: the job reports canceled, no
        // page end is emitted, and impressions stay 0.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("3-cancel.pwg");

        let printer = printer("epl2_4inch-203dpi");
        let mut lines = Vec::new();
        for _ in 0..1000 {
            lines.push(vec![0xffu8; 102]);
        }
        write_bilevel_raster(&path, 812, &lines, 1);

        let job = job_with_file(&printer, "image/pwg-raster", &path);

        let (mut device, written) = MemoryTransport::device();
        let options = prepare_options(&printer, &job, 1);
        let mut codec = printer.driver.codec();
        codec.start_job(&options, &mut device).unwrap();
        codec.start_page(&options, &mut device, 0).unwrap();

        let mut in_line = vec![0u8; 102];
        let mut reader = RasterReader::new(BufReader::new(File::open(&path).unwrap())).unwrap();
        let in_header = reader.next_page().unwrap().unwrap();
        for y in 0..in_header.height {
            if y == 500 {
                job.cancel();
            }
            if job.is_canceled() {
                break;
            }
            reader.read_line(&mut in_line).unwrap();
            // EPL2 wants inverted polarity.
            let line: Vec<u8> = in_line.iter().map(|b| !b).collect();
            codec.write_line(&options, &mut device, y, &line).unwrap();
        }

        assert!(job.is_canceled());
        let out = written.lock().unwrap().clone();
        // 500 GW lines, no P1 page end.
        assert_eq!(out.windows(2).filter(|w| w == b"GW").count(), 500);
        assert!(!out.windows(2).any(|w| w == b"P1"));
        assert_eq!(job.impressions_completed(), 0);
    }

    #[test]
    fn pipeline_cancel_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("4-cancel.pwg");

        let printer = printer("zpl_4inch-203dpi-dt");
        let lines = vec![vec![0u8; 102]; 10];
        write_bilevel_raster(&path, 812, &lines, 1);

        let job = job_with_file(&printer, "image/pwg-raster", &path);
        job.cancel();

        let (mut device, _) = MemoryTransport::device();
        assert!(matches!(
            process_job(&printer, &job, &mut device),
            Err(JobError::Canceled)
        ));
        assert_eq!(job.impressions_completed(), 0);
    }

    #[test]
    fn raw_documents_stream_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("5-raw.dat");
        let payload = b"^XA^FO50,50^A0N,50,50^FDHELLO^FS^XZ";
        File::create(&path).unwrap().write_all(payload).unwrap();

        let printer = printer("zpl_4inch-203dpi-dt");
        let job = job_with_file(&printer, "application/vnd.zebra-zpl", &path);

        let (mut device, written) = MemoryTransport::device();
        process_job(&printer, &job, &mut device).unwrap();

        assert_eq!(written.lock().unwrap().as_slice(), payload);
        assert_eq!(job.impressions(), 1);
        assert_eq!(job.impressions_completed(), 1);
    }

    #[test]
    fn unknown_formats_are_rejected() {
        let printer = printer("zpl_4inch-203dpi-dt");
        let job = Job::new(1, 1, "test", "op", "application/pdf", AttrTable::new());
        job.set_spooled(std::path::PathBuf::from("/nonexistent"));

        let (mut device, _) = MemoryTransport::device();
        assert!(matches!(
            process_job(&printer, &job, &mut device),
            Err(JobError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn png_jobs_render_and_count_copies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("6-image.png");

        // A black square on white.
        let mut img = image::GrayImage::from_pixel(64, 64, image::Luma([255u8]));
        for y in 16..48 {
            for x in 16..48 {
                img.put_pixel(x, y, image::Luma([0u8]));
            }
        }
        img.save(&path).unwrap();

        let printer = printer("zpl_4inch-203dpi-dt");
        let job = Job::new(1, 1, "img", "op", "image/png", AttrTable::new());
        job.set_spooled(path);

        let (mut device, written) = MemoryTransport::device();
        process_job(&printer, &job, &mut device).unwrap();

        assert_eq!(job.impressions(), 1);
        assert_eq!(job.impressions_completed(), 1);

        // Something other than blank lines made it out.
        let text = String::from_utf8(written.lock().unwrap().clone()).unwrap();
        let data_start = text.find(",\n").unwrap() + 2;
        assert!(text[data_start..].chars().any(|c| c != ','));
    }

    #[test]
    fn copies_duplicate_pages_exactly_once() {
        // copies=3 renders three independent pages; every per-page
        // copy-count command stays pinned to 1 so the device prints
        // three labels, not nine.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("8-copies.png");
        let img = image::GrayImage::from_pixel(32, 32, image::Luma([0u8]));
        img.save(&path).unwrap();

        struct Case {
            driver: &'static str,
            page_marker: &'static str,
            pinned: &'static str,
            live: &'static str,
        }
        let cases = [
            Case {
                driver: "zpl_4inch-203dpi-dt",
                page_marker: "~DGR:LPRINT.GRF,",
                pinned: "^PQ1, 0, 0, N\n",
                live: "^PQ3",
            },
            Case {
                driver: "tspl_203dpi",
                page_marker: "BITMAP 0,0,",
                pinned: "\nPRINT 1,1\n",
                live: "PRINT 3,1",
            },
            Case {
                driver: "cpcl_4inch-203dpi",
                page_marker: "PAGE-WIDTH ",
                pinned: " 1\r\nPAGE-WIDTH",
                live: " 3\r\nPAGE-WIDTH",
            },
        ];

        for case in cases {
            let printer = printer(case.driver);
            let attrs = AttrTable::new().with("copies", AttrValue::Integer(3));
            let job = Job::new(1, printer.id, "copies", "op", "image/png", attrs);
            job.set_spooled(path.clone());

            let (mut device, written) = MemoryTransport::device();
            process_job(&printer, &job, &mut device).unwrap();

            assert_eq!(job.impressions(), 3, "{}", case.driver);
            assert_eq!(job.impressions_completed(), 3, "{}", case.driver);

            // Lossy: the TSPL/CPCL captures carry raw bitmap bytes.
            let out = written.lock().unwrap().clone();
            let text = String::from_utf8_lossy(&out).into_owned();
            assert_eq!(
                text.matches(case.page_marker).count(),
                3,
                "{}: three page cycles",
                case.driver
            );
            assert_eq!(
                text.matches(case.pinned).count(),
                3,
                "{}: per-page copy count pinned to 1",
                case.driver
            );
            assert!(
                !text.contains(case.live),
                "{}: live copy count leaked onto the wire",
                case.driver
            );
        }
    }

    #[test]
    fn multi_page_raster_counts_impressions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("7-multi.pwg");

        let printer = printer("zpl_4inch-203dpi-dt");
        let header = PageHeader::for_bilevel(812, 4, 203, 203);
        let mut writer = RasterWriter::new(File::create(&path).unwrap());
        for _ in 0..3 {
            writer.write_header(&header).unwrap();
            for _ in 0..4 {
                writer.write_line(&vec![0u8; 102]).unwrap();
            }
        }
        writer.finish().unwrap();

        let job = job_with_file(&printer, "image/pwg-raster", &path);
        let (mut device, _) = MemoryTransport::device();
        process_job(&printer, &job, &mut device).unwrap();
        assert_eq!(job.impressions_completed(), 3);
    }
}
