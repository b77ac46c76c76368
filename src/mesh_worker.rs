//! Fragment synthesis off the main thread.
//!
//! Requests wait in a per-offset queue and are handed to a dedicated rayon
//! pool a few at a time. A newer request for an offset replaces the queued
//! one, and results of a replaced request that was already running are
//! discarded on collection. Workers never touch engine objects; texture
//! resolution and scene attachment happen on the thread that collects.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crossbeam::channel::{unbounded, Receiver, Sender};
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};

use crate::debug_log::debug_log;
use crate::shared_params::SynthesisParams;
use crate::terrain_mesh::{synthesize_fragment, FragmentMeshes, FragmentOffset};
use crate::tile_data::{HeightField, RoofDefinitions, WallDefinitions};

/// Fraction of detected CPUs to use for worker threads (numerator).
const THREAD_CPU_NUMERATOR: usize = 3;
/// Fraction of detected CPUs to use for worker threads (denominator).
const THREAD_CPU_DENOMINATOR: usize = 4;
/// Minimum number of worker threads.
const MIN_WORKER_THREADS: usize = 2;
/// Jobs started per worker thread; the rest stay queued.
const IN_FLIGHT_PER_THREAD: usize = 2;

pub struct FragmentRequest {
    pub offset: FragmentOffset,
    pub field: Arc<HeightField>,
    pub walls: Arc<WallDefinitions>,
    pub roofs: Arc<RoofDefinitions>,
    pub params: SynthesisParams,
}

pub struct FragmentResult {
    pub offset: FragmentOffset,
    pub meshes: FragmentMeshes,
}

/// Result tagged with the submission it answers.
struct Finished {
    generation: u64,
    result: FragmentResult,
}

pub fn default_thread_count() -> usize {
    ((num_cpus::get() * THREAD_CPU_NUMERATOR) / THREAD_CPU_DENOMINATOR).max(MIN_WORKER_THREADS)
}

pub struct FragmentWorkerPool {
    threads: ThreadPool,
    max_in_flight: usize,
    in_flight: usize,
    next_generation: u64,
    /// Offsets in submission order; each appears at most once.
    pending: VecDeque<FragmentOffset>,
    queued: HashMap<FragmentOffset, (u64, FragmentRequest)>,
    /// Generation of the newest submission per offset not yet collected.
    latest: HashMap<FragmentOffset, u64>,
    result_tx: Sender<Finished>,
    result_rx: Receiver<Finished>,
}

impl FragmentWorkerPool {
    /// `num_threads == 0` sizes the pool from the detected CPU count.
    pub fn new(num_threads: usize) -> Result<Self, ThreadPoolBuildError> {
        let num_threads = if num_threads == 0 {
            default_thread_count()
        } else {
            num_threads
        };
        let threads = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("fragment-worker-{i}"))
            .build()?;
        let (result_tx, result_rx) = unbounded();

        Ok(Self {
            max_in_flight: threads.current_num_threads() * IN_FLIGHT_PER_THREAD,
            threads,
            in_flight: 0,
            next_generation: 0,
            pending: VecDeque::new(),
            queued: HashMap::new(),
            latest: HashMap::new(),
            result_tx,
            result_rx,
        })
    }

    pub fn thread_count(&self) -> usize {
        self.threads.current_num_threads()
    }

    /// Requests waiting to start.
    pub fn queued_count(&self) -> usize {
        self.queued.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn is_idle(&self) -> bool {
        self.queued.is_empty() && self.in_flight == 0
    }

    /// Queue a request. A queued request for the same offset is replaced in
    /// place; a running one will have its result discarded.
    pub fn submit(&mut self, request: FragmentRequest) {
        let offset = request.offset;
        self.next_generation += 1;
        let generation = self.next_generation;
        self.latest.insert(offset, generation);

        if self.queued.insert(offset, (generation, request)).is_none() {
            self.pending.push_back(offset);
        } else {
            debug_log(&format!(
                "[fragment_worker] queued fragment {} replaced",
                offset.key()
            ));
        }
    }

    /// Forget every submission for `offset`.
    pub fn cancel(&mut self, offset: FragmentOffset) {
        self.latest.remove(&offset);
        if self.queued.remove(&offset).is_some() {
            self.pending.retain(|o| *o != offset);
        }
    }

    /// Start queued requests until the in-flight limit is reached.
    pub fn dispatch(&mut self) {
        while self.in_flight < self.max_in_flight {
            let Some(offset) = self.pending.pop_front() else {
                break;
            };
            let Some((generation, request)) = self.queued.remove(&offset) else {
                continue;
            };

            let tx = self.result_tx.clone();
            self.in_flight += 1;
            self.threads.spawn(move || {
                let result = synthesize_request(&request);
                if tx.send(Finished { generation, result }).is_err() {
                    debug_log(&format!(
                        "[fragment_worker] pool gone before fragment {} finished",
                        offset.key()
                    ));
                }
            });
        }
    }

    /// Finished fragments that are still wanted, then start more queued work.
    pub fn collect(&mut self) -> Vec<FragmentResult> {
        let mut done = Vec::new();
        for finished in self.result_rx.try_iter() {
            self.in_flight = self.in_flight.saturating_sub(1);
            let offset = finished.result.offset;
            if self.latest.get(&offset) == Some(&finished.generation) {
                self.latest.remove(&offset);
                done.push(finished.result);
            } else {
                debug_log(&format!(
                    "[fragment_worker] stale result for fragment {} discarded",
                    offset.key()
                ));
            }
        }
        self.dispatch();
        done
    }

    /// Drop all queued work. Running jobs finish but their results are ignored.
    pub fn shutdown(&mut self) {
        self.pending.clear();
        self.queued.clear();
        self.latest.clear();
        while self.result_rx.try_recv().is_ok() {
            self.in_flight = self.in_flight.saturating_sub(1);
        }
    }
}

fn synthesize_request(request: &FragmentRequest) -> FragmentResult {
    FragmentResult {
        offset: request.offset,
        meshes: synthesize_fragment(
            &request.field,
            Some(request.offset),
            &request.walls,
            &request.roofs,
            &request.params,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile_data::{BuildingRecord, WallPosition, WallSegment, WallType};
    use std::time::{Duration, Instant};

    fn test_field(peak: f32) -> Arc<HeightField> {
        let mut field = HeightField::new(8);
        field.set_elevation(3, 3, peak);
        field.set_building(
            2,
            2,
            0,
            BuildingRecord::with_walls(vec![WallSegment::new("stone", WallPosition::PlusY)]),
        );
        Arc::new(field)
    }

    fn request(offset: FragmentOffset, field: &Arc<HeightField>) -> FragmentRequest {
        let mut walls = WallDefinitions::new();
        walls.insert("stone".into(), WallType::polygon("stone.png"));
        FragmentRequest {
            offset,
            field: Arc::clone(field),
            walls: Arc::new(walls),
            roofs: Arc::new(RoofDefinitions::new()),
            params: SynthesisParams::default(),
        }
    }

    /// Collect until the pool is idle or the deadline passes.
    fn drain(pool: &mut FragmentWorkerPool) -> Vec<FragmentResult> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut results = pool.collect();
        while !pool.is_idle() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
            results.extend(pool.collect());
        }
        results
    }

    #[test]
    fn test_thread_count_matches_requested() {
        let pool = FragmentWorkerPool::new(3).unwrap();
        assert_eq!(pool.thread_count(), 3);
    }

    #[test]
    fn test_default_thread_count_has_floor() {
        let pool = FragmentWorkerPool::new(0).unwrap();
        assert!(pool.thread_count() >= MIN_WORKER_THREADS);
        assert_eq!(pool.thread_count(), default_thread_count());
    }

    #[test]
    fn test_submit_and_collect_fragment() {
        let mut pool = FragmentWorkerPool::new(2).unwrap();
        pool.submit(request(FragmentOffset::new(0, 0), &test_field(1.5)));

        let results = drain(&mut pool);
        assert_eq!(results.len(), 1);

        let result = &results[0];
        assert_eq!(result.offset, FragmentOffset::new(0, 0));
        assert_eq!(result.meshes.offset, Some(FragmentOffset::new(0, 0)));
        assert_eq!(result.meshes.surface.buffers.triangle_count(), 128);
        assert_eq!(result.meshes.walls[0].buffers.triangle_count(), 2);
        assert_eq!(result.meshes.sampler.height_at(3.0, 3.0), 1.5);
    }

    #[test]
    fn test_burst_larger_than_in_flight_limit_is_not_lost() {
        let mut pool = FragmentWorkerPool::new(2).unwrap();
        let field = test_field(1.0);

        let offsets: Vec<FragmentOffset> = (0..80)
            .map(|i| FragmentOffset::new(i % 10, i / 10))
            .collect();
        for offset in &offsets {
            pool.submit(request(*offset, &field));
        }
        assert_eq!(pool.queued_count(), 80);

        pool.dispatch();
        assert_eq!(pool.in_flight(), 2 * IN_FLIGHT_PER_THREAD);

        let results = drain(&mut pool);
        assert_eq!(results.len(), 80);
        for offset in &offsets {
            assert!(results.iter().any(|r| r.offset == *offset), "missing {offset:?}");
        }
        assert!(pool.is_idle());
    }

    #[test]
    fn test_queued_request_is_replaced() {
        let mut pool = FragmentWorkerPool::new(1).unwrap();
        let offset = FragmentOffset::new(4, 4);
        pool.submit(request(offset, &test_field(1.0)));
        pool.submit(request(offset, &test_field(2.0)));
        assert_eq!(pool.queued_count(), 1);

        let results = drain(&mut pool);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].meshes.sampler.height_at(3.0, 3.0), 2.0);
    }

    #[test]
    fn test_running_request_result_is_superseded() {
        let mut pool = FragmentWorkerPool::new(1).unwrap();
        let offset = FragmentOffset::new(1, 2);
        pool.submit(request(offset, &test_field(1.0)));
        pool.dispatch();
        assert_eq!(pool.in_flight(), 1);

        pool.submit(request(offset, &test_field(3.0)));

        let results = drain(&mut pool);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].meshes.sampler.height_at(3.0, 3.0), 3.0);
    }

    #[test]
    fn test_cancel_drops_queued_and_running_work() {
        let mut pool = FragmentWorkerPool::new(1).unwrap();
        let field = test_field(1.0);
        let running = FragmentOffset::new(0, 0);
        let waiting = FragmentOffset::new(5, 5);

        pool.submit(request(running, &field));
        pool.dispatch();
        pool.submit(request(waiting, &field));
        pool.submit(request(FragmentOffset::new(9, 9), &field));
        pool.cancel(running);
        pool.cancel(waiting);

        let results = drain(&mut pool);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].offset, FragmentOffset::new(9, 9));
    }

    #[test]
    fn test_shutdown_drops_queued_requests() {
        let mut pool = FragmentWorkerPool::new(1).unwrap();
        pool.submit(request(FragmentOffset::new(0, 0), &test_field(1.0)));

        pool.shutdown();

        assert!(pool.is_idle());
        assert!(drain(&mut pool).is_empty());
    }
}
