use crate::graph::mailbox::{DensityRenderRequest, GeometryMailbox, MeshBuffer};
use crate::graph::mesh::{DensityPeaks, MeshBuilder, generate_density_mesh};
use anyhow::bail;
use log::{debug, info, trace, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Polling = 0,
    Generating = 1,
    Stopped = 2,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Polling,
            1 => WorkerState::Generating,
            _ => WorkerState::Stopped,
        }
    }
}

/// Background thread that turns the latest mailbox request into a mesh.
///
/// Shutdown is only noticed between passes, so [`GeometryWorker::stop`] waits out any pass in
/// flight before returning.
#[derive(Debug)]
pub struct GeometryWorker {
    mailbox: Arc<GeometryMailbox>,
    results: Arc<MeshBuffer>,
    poll_interval: Duration,
    state: Arc<AtomicU8>,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
}

impl GeometryWorker {
    pub fn new(
        mailbox: Arc<GeometryMailbox>,
        results: Arc<MeshBuffer>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            mailbox,
            results,
            poll_interval,
            state: Arc::new(AtomicU8::new(WorkerState::Stopped as u8)),
            worker_handle: Mutex::new(None),
        }
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn start(&self) -> anyhow::Result<()> {
        let Ok(mut handle) = self.worker_handle.lock() else {
            bail!("Failed to lock worker handle..!")
        };

        if handle.is_some() {
            bail!("Density graph worker already running..!")
        }
        if self.mailbox.should_shutdown() {
            bail!("Density graph worker was already shut down..!")
        }

        let mailbox = Arc::clone(&self.mailbox);
        let results = Arc::clone(&self.results);
        let state = Arc::clone(&self.state);
        let poll_interval = self.poll_interval;
        state.store(WorkerState::Polling as u8, Ordering::Release);

        let spawned = thread::Builder::new()
            .name("density-graph".to_owned())
            .spawn(move || run(&mailbox, &results, &state, poll_interval));

        match spawned {
            Ok(spawned) => *handle = Some(spawned),
            Err(why) => {
                self.state
                    .store(WorkerState::Stopped as u8, Ordering::Release);
                bail!("Failed to spawn the density graph worker: {}..!", why)
            }
        }

        info!("Started density graph worker..!");
        Ok(())
    }

    /// Requests shutdown and joins the thread. Calling it again is a no-op.
    pub fn stop(&self) -> anyhow::Result<()> {
        self.mailbox.request_shutdown();

        let Ok(mut lock) = self.worker_handle.lock() else {
            bail!("Failed to lock worker handle..!")
        };

        if let Some(handle) = lock.take() {
            if handle.join().is_err() {
                bail!("Density graph worker panicked..!")
            }
            debug!("Density graph worker joined..!");
            info!("Stopped density graph worker..!");
        }

        Ok(())
    }
}

fn run(mailbox: &GeometryMailbox, results: &MeshBuffer, state: &AtomicU8, poll_interval: Duration) {
    let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
    let mut builder = MeshBuilder::default();

    loop {
        if mailbox.should_shutdown() {
            break;
        }

        let Some(request) = mailbox.try_dequeue() else {
            sleeper.sleep(poll_interval);
            continue;
        };

        if mailbox.take_capacity_reset() {
            builder.reset_capacities();
        }

        state.store(WorkerState::Generating as u8, Ordering::Release);
        render_pass(generate_density_mesh, &request, &mut builder, results);
        state.store(WorkerState::Polling as u8, Ordering::Release);
    }

    state.store(WorkerState::Stopped as u8, Ordering::Release);
}

/// Runs one pass and publishes its mesh. Errors and panics are dropped so the loop survives
/// them. Returns whether a mesh was published.
fn render_pass<F>(
    generate: F,
    request: &DensityRenderRequest,
    builder: &mut MeshBuilder,
    results: &MeshBuffer,
) -> bool
where
    F: FnOnce(&DensityRenderRequest, &mut MeshBuilder) -> anyhow::Result<DensityPeaks>,
{
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| generate(request, &mut *builder)));
    match outcome {
        Ok(Ok(peaks)) => {
            results.publish(builder, peaks);
            true
        }
        // half edited snapshots fail here routinely, the next request replaces them
        Ok(Err(why)) => {
            trace!("Discarded density graph pass: {:?}", why);
            false
        }
        Err(_) => {
            warn!("Density graph pass panicked, discarding it..!");
            builder.clear();
            false
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::density::measures::Measure;
    use crate::graph::mailbox::DensityRenderRequest;
    use crate::model::config::GraphConfig;
    use std::time::Instant;

    fn wait_for_generation(results: &MeshBuffer, generation: u64) -> bool {
        let start = Instant::now();
        while results.generation() < generation {
            if start.elapsed() > Duration::from_secs(10) {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    fn request(count: i32) -> DensityRenderRequest {
        let measures = [Measure {
            start_time: 0.0,
            end_time: 2.0,
            step_count: count,
            row_count: count,
        }];
        DensityRenderRequest::new(&measures, 2.0, 64.0, 16.0, &GraphConfig::default())
    }

    #[test]
    fn publishes_and_stops() {
        env_logger::try_init().unwrap_or(());

        let mailbox = Arc::new(GeometryMailbox::new());
        let results = Arc::new(MeshBuffer::new());
        let worker = GeometryWorker::new(
            Arc::clone(&mailbox),
            Arc::clone(&results),
            Duration::from_millis(1),
        );
        assert_eq!(worker.state(), WorkerState::Stopped);

        worker.start().unwrap();
        assert!(worker.start().is_err());

        mailbox.enqueue(request(8)).unwrap();
        assert!(wait_for_generation(&results, 1));
        let mesh = results.try_read().unwrap();
        assert!(mesh.is_consistent());
        assert_eq!(mesh.peak_notes_per_second, 4.0);

        worker.stop().unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert!(worker.stop().is_ok());
        assert!(worker.start().is_err());
    }

    #[test]
    fn failed_passes_keep_the_old_mesh() {
        let mailbox = Arc::new(GeometryMailbox::new());
        let results = Arc::new(MeshBuffer::new());
        let worker = GeometryWorker::new(
            Arc::clone(&mailbox),
            Arc::clone(&results),
            Duration::from_millis(1),
        );
        worker.start().unwrap();

        mailbox.enqueue(request(8)).unwrap();
        assert!(wait_for_generation(&results, 1));

        let mut bad = request(4);
        bad.final_time = f64::NAN;
        mailbox.enqueue(bad).unwrap();
        mailbox.enqueue(request(16)).unwrap();
        assert!(wait_for_generation(&results, 2));
        assert_eq!(results.try_read().unwrap().peak_notes_per_second, 8.0);

        let mut bad = request(4);
        bad.height = -1.0;
        mailbox.enqueue(bad).unwrap();
        // the bad request is consumed without publishing
        let start = Instant::now();
        while mailbox.has_new_data() && start.elapsed() < Duration::from_secs(10) {
            thread::sleep(Duration::from_millis(1));
        }
        worker.stop().unwrap();
        assert_eq!(results.generation(), 2);
        assert_eq!(results.try_read().unwrap().peak_notes_per_second, 8.0);
    }

    #[test]
    fn panicking_pass_is_survived() {
        let results = MeshBuffer::new();
        let mut builder = MeshBuilder::default();
        let request = request(8);

        let published = render_pass(
            |_: &DensityRenderRequest, builder: &mut MeshBuilder| -> anyhow::Result<DensityPeaks> {
                builder.push_vertex(0.0, 0.0, Default::default());
                panic!("broken pass")
            },
            &request,
            &mut builder,
            &results,
        );
        assert!(!published);
        assert_eq!(results.generation(), 0);

        assert!(render_pass(generate_density_mesh, &request, &mut builder, &results));
        assert_eq!(results.generation(), 1);
        let mesh = results.try_read().unwrap();
        assert!(mesh.is_consistent());
        assert_eq!(mesh.peak_notes_per_second, 4.0);
    }
}
