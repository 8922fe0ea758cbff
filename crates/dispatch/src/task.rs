/// A single unit of work on its way from the feeder to a worker process.
///
/// `task_id` is assigned by the feeder, monotonically from zero, and is
/// carried through every [`dispatch_core::ResultMessage`] reported for it.
#[derive(Debug, Clone)]
pub struct Task<P> {
    pub task_id: u64,
    pub payload: P,
}
