//! System registry and printer runtime
//!
//! The [`System`] owns every printer and job, keyed by stable integer
//! ids — objects refer to each other through the registry rather than
//! holding pointers.  Each printer gets a dedicated worker thread that
//! owns the device handle while printing: jobs are dispatched strictly
//! FIFO, a failed device open parks the printer in `stopped` and
//! retries indefinitely, and an empty queue closes the device.
//!
//! Completed jobs stay queryable in a per-printer ring until the
//! garbage-collection window passes, then job and spool file disappear
//! together.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, error, info, warn};

use crate::device::{Device, DeviceUri};
use crate::drivers::Driver;
use crate::error::{DeviceError, JobError, SystemError};
use crate::job::{spool_filename, Job, JobState};
use crate::options::AttrTable;
use crate::pipeline;
use crate::printer::{Printer, PrinterState, StateReasons};

/// Opens device connections; replaceable for tests and exotic setups
pub type DeviceFactory = dyn Fn(&DeviceUri) -> Result<Device, DeviceError> + Send + Sync;

/// Runtime tuning knobs
#[derive(Debug, Clone)]
pub struct SystemConfig {
    /// Spool directory; a per-user temp directory when `None`
    pub spool_dir: Option<PathBuf>,
    /// Delay between device open attempts for an unavailable printer
    pub retry_interval: Duration,
    /// How long completed jobs stay queryable
    pub gc_window: Duration,
    /// How long shutdown waits for active jobs to drain
    pub drain_timeout: Duration,
}

impl Default for SystemConfig {
    fn default() -> SystemConfig {
        SystemConfig {
            spool_dir: None,
            retry_interval: Duration::from_secs(5),
            gc_window: Duration::from_secs(60),
            drain_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Default)]
struct Registry {
    printers: HashMap<u32, Arc<Printer>>,
    jobs: HashMap<u32, Arc<Job>>,
    next_printer_id: u32,
    next_job_id: u32,
}

struct SystemInner {
    config: SystemConfig,
    spool_dir: PathBuf,
    registry: RwLock<Registry>,
    device_factory: Box<DeviceFactory>,
    shutting_down: AtomicBool,
}

/// The label printing service core
pub struct System {
    inner: Arc<SystemInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl System {
    /// Create a system with the real device transports
    pub fn new(config: SystemConfig) -> Result<System, SystemError> {
        System::with_device_factory(config, Box::new(|uri| Device::open(uri)))
    }

    /// Create a system with a custom device factory
    ///
    /// The factory is the single seam through which workers and status
    /// polls open devices, so tests can substitute mock transports.
    pub fn with_device_factory(
        config: SystemConfig,
        device_factory: Box<DeviceFactory>,
    ) -> Result<System, SystemError> {
        let spool_dir = match &config.spool_dir {
            Some(dir) => dir.clone(),
            None => std::env::temp_dir().join(format!(
                "labelpress{}.d",
                nix::unistd::getuid().as_raw()
            )),
        };

        {
            use std::os::unix::fs::DirBuilderExt;
            let mut builder = std::fs::DirBuilder::new();
            builder.recursive(true).mode(0o700);
            builder.create(&spool_dir)?;
        }

        info!(spool_dir = %spool_dir.display(), "system started");

        Ok(System {
            inner: Arc::new(SystemInner {
                config,
                spool_dir,
                registry: RwLock::default(),
                device_factory,
                shutting_down: AtomicBool::new(false),
            }),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Add a printer and start its worker
    pub fn add_printer(
        &self,
        name: &str,
        device_uri: &str,
        driver_name: &str,
        attrs: AttrTable,
    ) -> Result<u32, SystemError> {
        if self.inner.is_shutting_down() {
            return Err(SystemError::ShuttingDown);
        }

        let uri: DeviceUri = device_uri.parse()?;
        let driver = Driver::new(driver_name)
            .ok_or_else(|| SystemError::UnknownDriver(driver_name.to_string()))?;

        let printer = {
            let mut registry = self.inner.registry_mut();
            registry.next_printer_id += 1;
            let printer = Arc::new(Printer::new(
                registry.next_printer_id,
                name.to_string(),
                uri,
                driver,
                attrs,
            ));
            registry.printers.insert(printer.id, Arc::clone(&printer));
            printer
        };

        info!(printer = printer.id, name = %printer.name, driver = %printer.driver.name, "printer added");

        let inner = Arc::clone(&self.inner);
        let worker_printer = Arc::clone(&printer);
        let handle = std::thread::Builder::new()
            .name(format!("printer-{}", printer.id))
            .spawn(move || worker_loop(&inner, &worker_printer))?;
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);

        Ok(printer.id)
    }

    /// Spool a document and queue it on a printer
    ///
    /// Stands in for the IPP front-end: the job is created `held`,
    /// moves to `pending` when the document hits the spool, and is
    /// queued for the printer worker.
    pub fn submit_job(
        &self,
        printer_id: u32,
        job_name: &str,
        username: &str,
        format: &str,
        attrs: AttrTable,
        document: &[u8],
    ) -> Result<u32, SystemError> {
        if self.inner.is_shutting_down() {
            return Err(SystemError::ShuttingDown);
        }

        let printer = self
            .inner
            .printer(printer_id)
            .ok_or(SystemError::UnknownPrinter(printer_id))?;

        let job = {
            let mut registry = self.inner.registry_mut();
            registry.next_job_id += 1;
            let job = Arc::new(Job::new(
                registry.next_job_id,
                printer_id,
                job_name,
                username,
                format,
                attrs,
            ));
            registry.jobs.insert(job.id, Arc::clone(&job));
            job
        };

        let filename = spool_filename(&self.inner.spool_dir, job.id, job_name, format);
        std::fs::File::create(&filename)?.write_all(document)?;
        job.set_spooled(filename);

        {
            let mut queue = printer.lock_queue();
            queue.active.push_back(job.id);
        }
        printer.queue_cond.notify_all();

        debug!(job = job.id, printer = printer_id, "job queued");
        Ok(job.id)
    }

    /// Cancel a job
    ///
    /// A queued job is removed immediately; a printing job gets its
    /// cancel flag set and terminates at the next scanline boundary.
    pub fn cancel_job(&self, job_id: u32) -> Result<(), SystemError> {
        let job = self.inner.job(job_id).ok_or(SystemError::UnknownJob(job_id))?;
        let printer = self
            .inner
            .printer(job.printer_id)
            .ok_or(SystemError::UnknownPrinter(job.printer_id))?;

        let mut queue = printer.lock_queue();
        if let Some(index) = queue.active.iter().position(|&id| id == job_id) {
            // Not started yet: just drop it from the queue.
            queue.active.remove(index);
            queue.completed.push_back(job_id);
            drop(queue);
            job.set_state(JobState::Canceled);
            info!(job = job_id, "queued job canceled");
        } else {
            drop(queue);
            job.cancel();
            info!(job = job_id, "cancel requested");
        }

        Ok(())
    }

    /// Look up a job
    pub fn job(&self, job_id: u32) -> Option<Arc<Job>> {
        self.inner.job(job_id)
    }

    /// Look up a printer
    pub fn printer(&self, printer_id: u32) -> Option<Arc<Printer>> {
        self.inner.printer(printer_id)
    }

    /// Ids of all configured printers
    pub fn printer_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.inner.registry().printers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Query the device for fresh printer-state-reasons
    ///
    /// Only runs when the device is idle; while a job is printing the
    /// cached reasons are returned untouched.
    pub fn poll_status(&self, printer_id: u32) -> Result<StateReasons, SystemError> {
        let printer = self
            .inner
            .printer(printer_id)
            .ok_or(SystemError::UnknownPrinter(printer_id))?;

        // The worker holds the gate whenever it has the device open.
        let Ok(_gate) = printer.device_gate.try_lock() else {
            return Ok(printer.state_reasons());
        };

        match (self.inner.device_factory)(&printer.device_uri) {
            Ok(mut device) => match printer.driver.poll_device_status(&mut device) {
                Ok(Some(reasons)) => {
                    printer.set_reasons(reasons);
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(printer = printer_id, error = %e, "status query failed");
                }
            },
            Err(e) => {
                debug!(printer = printer_id, error = %e, "unable to open device for status");
            }
        }

        Ok(printer.state_reasons())
    }

    /// Garbage-collect completed jobs past the grace window
    pub fn clean_jobs(&self) {
        self.inner.clean_jobs();
    }

    /// Drain active jobs and stop all workers
    ///
    /// Queued jobs are still printed, bounded by the drain timeout;
    /// workers stuck on an unavailable printer abandon their retry
    /// loop.
    pub fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);

        for printer in self.inner.registry().printers.values() {
            printer.queue_cond.notify_all();
        }

        let deadline = Instant::now() + self.inner.config.drain_timeout;
        let mut workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );

        while !workers.is_empty() && Instant::now() < deadline {
            workers.retain(|handle| !handle.is_finished());
            std::thread::sleep(Duration::from_millis(10));
        }

        for handle in workers {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!("worker did not drain before the shutdown deadline");
            }
        }

        self.inner.clean_jobs();
        info!("system stopped");
    }
}

impl SystemInner {
    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn registry(&self) -> std::sync::RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_mut(&self) -> std::sync::RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn printer(&self, id: u32) -> Option<Arc<Printer>> {
        self.registry().printers.get(&id).cloned()
    }

    fn job(&self, id: u32) -> Option<Arc<Job>> {
        self.registry().jobs.get(&id).cloned()
    }

    fn clean_jobs(&self) {
        let cutoff = SystemTime::now() - self.config.gc_window;
        let printers: Vec<Arc<Printer>> = self.registry().printers.values().cloned().collect();

        for printer in printers {
            let mut expired = Vec::new();
            {
                let mut queue = printer.lock_queue();
                queue.completed.retain(|&job_id| {
                    let keep = match self.job(job_id).and_then(|job| job.completed_at()) {
                        Some(completed) => completed > cutoff,
                        None => false,
                    };
                    if !keep {
                        expired.push(job_id);
                    }
                    keep
                });
            }

            for job_id in expired {
                if let Some(job) = self.registry_mut().jobs.remove(&job_id) {
                    if let Some(filename) = job.filename() {
                        let _ = std::fs::remove_file(&filename);
                        let _ = std::fs::remove_file(filename.with_extension("out"));
                    }
                    debug!(job = job_id, "job removed from history");
                }
            }
        }
    }
}

impl Printer {
    fn lock_queue(&self) -> MutexGuard<'_, crate::printer::PrinterQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The per-printer worker: owns the device while printing
fn worker_loop(inner: &Arc<SystemInner>, printer: &Arc<Printer>) {
    let mut device: Option<Device> = None;
    let mut gate: Option<MutexGuard<'_, ()>> = None;

    loop {
        // Wait for the next job, closing the device while idle.
        let job_id = {
            let mut queue = printer.lock_queue();
            loop {
                if let Some(id) = queue.active.pop_front() {
                    queue.processing = Some(id);
                    break id;
                }

                if inner.is_shutting_down() {
                    drop(queue);
                    device = None;
                    gate.take();
                    printer.set_state(PrinterState::Idle);
                    return;
                }

                if device.is_some() {
                    debug!(printer = printer.id, "queue empty, closing device");
                    device = None;
                    gate.take();
                }
                printer.set_state(PrinterState::Idle);

                queue = printer
                    .queue_cond
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        let Some(job) = inner.job(job_id) else {
            printer.lock_queue().processing = None;
            continue;
        };

        // Open the device lazily; an unavailable printer parks the
        // queue in `stopped` and we retry until it comes back.
        if device.is_none() {
            gate = Some(
                printer
                    .device_gate
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            );
            let mut first_attempt = true;

            loop {
                if inner.is_shutting_down() {
                    let mut queue = printer.lock_queue();
                    queue.active.push_front(job_id);
                    queue.processing = None;
                    drop(queue);
                    gate.take();
                    printer.set_state(PrinterState::Idle);
                    return;
                }

                match (inner.device_factory)(&printer.device_uri) {
                    Ok(opened) => {
                        device = Some(opened);
                        break;
                    }
                    Err(e) => {
                        if first_attempt {
                            error!(
                                printer = printer.id,
                                uri = %printer.device_uri,
                                error = %e,
                                "unable to open device, pausing queue until the printer becomes available"
                            );
                            printer.set_state(PrinterState::Stopped);
                            first_attempt = false;
                        } else {
                            debug!(printer = printer.id, error = %e, "device still unavailable");
                        }
                        std::thread::sleep(inner.config.retry_interval);
                    }
                }
            }
        }

        // Print it.
        printer.set_state(PrinterState::Processing);
        job.set_state(JobState::Processing);

        let result = pipeline::process_job(printer, &job, device.as_mut().expect("device is open"));

        let device_failed = matches!(&result, Err(JobError::Device(_)));
        let final_state = match result {
            Ok(()) if job.is_canceled() => JobState::Canceled,
            Ok(()) => JobState::Completed,
            Err(JobError::Canceled) => JobState::Canceled,
            Err(e) => {
                error!(job = job.id, error = %e, "job failed");
                JobState::Aborted
            }
        };
        job.set_state(final_state);
        printer.add_impressions(job.impressions_completed());
        info!(job = job.id, state = %final_state, "job finished");

        {
            let mut queue = printer.lock_queue();
            queue.processing = None;
            queue.completed.push_back(job_id);
        }

        if device_failed {
            // Force a fresh open for the next job.
            warn!(printer = printer.id, "closing device after I/O failure");
            device = None;
            gate.take();
        }

        inner.clean_jobs();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::MemoryTransport;
    use crate::device::Transport;
    use std::sync::atomic::AtomicUsize;

    fn test_config(dir: &tempfile::TempDir) -> SystemConfig {
        SystemConfig {
            spool_dir: Some(dir.path().to_path_buf()),
            retry_interval: Duration::from_millis(30),
            gc_window: Duration::from_secs(60),
            drain_timeout: Duration::from_secs(5),
        }
    }

    fn wait_for<F: Fn() -> bool>(what: &str, predicate: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !predicate() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Factory producing capture devices that share one buffer
    fn capture_factory() -> (Box<DeviceFactory>, Arc<Mutex<Vec<u8>>>) {
        let captured: Arc<Mutex<Vec<u8>>> = Arc::default();
        let sink = Arc::clone(&captured);
        let factory: Box<DeviceFactory> = Box::new(move |_uri| {
            let sink = Arc::clone(&sink);
            struct SharedCapture(Arc<Mutex<Vec<u8>>>);
            impl Transport for SharedCapture {
                fn read(&mut self, _buf: &mut [u8]) -> Result<usize, DeviceError> {
                    Ok(0)
                }
                fn write_all(&mut self, data: &[u8]) -> Result<(), DeviceError> {
                    self.0.lock().unwrap().extend_from_slice(data);
                    Ok(())
                }
            }
            Ok(Device::from_transport(
                "test://capture".into(),
                Box::new(SharedCapture(sink)),
            ))
        });
        (factory, captured)
    }

    #[test]
    fn jobs_print_in_fifo_order() {
        let dir = tempfile::tempdir().unwrap();
        let (factory, captured) = capture_factory();
        let system = System::with_device_factory(test_config(&dir), factory).unwrap();

        let printer = system
            .add_printer("zebra", "socket://127.0.0.1:9100", "zpl_4inch-203dpi-dt", AttrTable::new())
            .unwrap();

        let mut ids = Vec::new();
        for payload in [b"JOB-ONE", b"JOB-TWO", b"JOB-SIX"] {
            ids.push(
                system
                    .submit_job(printer, "t", "op", "application/vnd.zebra-zpl", AttrTable::new(), payload)
                    .unwrap(),
            );
        }

        wait_for("all jobs to finish", || {
            ids.iter().all(|&id| system.job(id).unwrap().state().is_terminal())
        });

        for &id in &ids {
            assert_eq!(system.job(id).unwrap().state(), JobState::Completed);
        }

        let text = String::from_utf8(captured.lock().unwrap().clone()).unwrap();
        let one = text.find("JOB-ONE").unwrap();
        let two = text.find("JOB-TWO").unwrap();
        let six = text.find("JOB-SIX").unwrap();
        assert!(one < two && two < six);

        assert_eq!(system.printer(printer).unwrap().state(), PrinterState::Idle);
        system.shutdown();
    }

    #[test]
    fn unavailable_device_retries_without_failing_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let factory: Box<DeviceFactory> = Box::new(move |_uri| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(DeviceError::Unavailable("printer is off".into()))
            } else {
                let (device, _) = {
                    // A throwaway capture device once the printer "comes
                    // back".
                    MemoryTransport::device()
                };
                Ok(device)
            }
        });

        let system = System::with_device_factory(test_config(&dir), factory).unwrap();
        let printer = system
            .add_printer("flaky", "socket://127.0.0.1:9100", "zpl_4inch-203dpi-dt", AttrTable::new())
            .unwrap();

        let job = system
            .submit_job(printer, "t", "op", "application/vnd.zebra-zpl", AttrTable::new(), b"DATA")
            .unwrap();

        // The first two opens fail: the printer reports stopped while
        // the job stays pending.
        wait_for("printer to stop", || {
            system.printer(printer).unwrap().state() == PrinterState::Stopped
        });
        assert_eq!(system.job(job).unwrap().state(), JobState::Pending);

        wait_for("job to finish", || system.job(job).unwrap().state().is_terminal());
        assert_eq!(system.job(job).unwrap().state(), JobState::Completed);
        assert!(attempts.load(Ordering::SeqCst) >= 3);
        system.shutdown();
    }

    #[test]
    fn queued_jobs_cancel_without_printing() {
        let dir = tempfile::tempdir().unwrap();
        // Device never opens: jobs stay queued.
        let factory: Box<DeviceFactory> =
            Box::new(|_uri| Err(DeviceError::Unavailable("unplugged".into())));
        let system = System::with_device_factory(test_config(&dir), factory).unwrap();

        let printer = system
            .add_printer("dead", "socket://127.0.0.1:9100", "zpl_4inch-203dpi-dt", AttrTable::new())
            .unwrap();

        let first = system
            .submit_job(printer, "a", "op", "application/vnd.zebra-zpl", AttrTable::new(), b"A")
            .unwrap();
        let second = system
            .submit_job(printer, "b", "op", "application/vnd.zebra-zpl", AttrTable::new(), b"B")
            .unwrap();

        // The second job has not been dispatched; cancel removes it.
        system.cancel_job(second).unwrap();
        wait_for("cancel to land", || {
            system.job(second).unwrap().state() == JobState::Canceled
        });
        assert_eq!(system.job(second).unwrap().impressions_completed(), 0);

        // The first is retrying the device open and stays pending.
        assert_ne!(system.job(first).unwrap().state(), JobState::Completed);
        system.shutdown();
    }

    #[test]
    fn completed_jobs_are_garbage_collected() {
        let dir = tempfile::tempdir().unwrap();
        let (factory, _) = capture_factory();
        let mut config = test_config(&dir);
        config.gc_window = Duration::from_millis(0);
        let system = System::with_device_factory(config, factory).unwrap();

        let printer = system
            .add_printer("zebra", "socket://127.0.0.1:9100", "zpl_4inch-203dpi-dt", AttrTable::new())
            .unwrap();
        let job = system
            .submit_job(printer, "gc", "op", "application/vnd.zebra-zpl", AttrTable::new(), b"X")
            .unwrap();

        wait_for("job to finish", || {
            system.job(job).map_or(true, |j| j.state().is_terminal())
        });

        let spool = system.job(job).and_then(|j| j.filename());
        std::thread::sleep(Duration::from_millis(20));
        system.clean_jobs();

        assert!(system.job(job).is_none());
        if let Some(path) = spool {
            assert!(!path.exists());
        }
        system.shutdown();
    }

    #[test]
    fn status_poll_reaches_the_device_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        let factory: Box<DeviceFactory> = Box::new(|_uri| {
            let (device, _) = MemoryTransport::device_with_replies(vec![
                b"ERRORS: 0 00 00000001 WARNINGS: 0 00 00000008".to_vec(),
            ]);
            Ok(device)
        });
        let system = System::with_device_factory(test_config(&dir), factory).unwrap();
        let printer = system
            .add_printer("zebra", "socket://127.0.0.1:9100", "zpl_4inch-203dpi-dt", AttrTable::new())
            .unwrap();

        let reasons = system.poll_status(printer).unwrap();
        assert_eq!(reasons, StateReasons::MEDIA_EMPTY | StateReasons::MEDIA_LOW);
        assert_eq!(
            reasons.keywords(),
            vec!["media-empty", "media-low"]
        );
        system.shutdown();
    }

    #[test]
    fn unknown_driver_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (factory, _) = capture_factory();
        let system = System::with_device_factory(test_config(&dir), factory).unwrap();
        assert!(matches!(
            system.add_printer("x", "socket://h:1", "laserjet_4", AttrTable::new()),
            Err(SystemError::UnknownDriver(_))
        ));
        assert!(matches!(
            system.add_printer("x", "http://h:1", "zpl_4inch-203dpi-dt", AttrTable::new()),
            Err(SystemError::Device(_))
        ));
        system.shutdown();
    }

    #[test]
    fn shutdown_rejects_new_work() {
        let dir = tempfile::tempdir().unwrap();
        let (factory, _) = capture_factory();
        let system = System::with_device_factory(test_config(&dir), factory).unwrap();
        let printer = system
            .add_printer("zebra", "socket://127.0.0.1:9100", "zpl_4inch-203dpi-dt", AttrTable::new())
            .unwrap();

        system.shutdown();
        assert!(matches!(
            system.submit_job(printer, "x", "op", "application/vnd.zebra-zpl", AttrTable::new(), b"X"),
            Err(SystemError::ShuttingDown)
        ));
    }
}
