use std::sync::Arc;

use tokio::sync::{Mutex, Notify, watch};

use crate::breaker::CircuitBreaker;
use crate::queue::WorkQueue;
use crate::scheduler::SchedulerPhase;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub queue: Arc<dyn WorkQueue>,
    pub breaker: Arc<Mutex<CircuitBreaker>>,
    pub phase: watch::Receiver<SchedulerPhase>,
    pub wake: Arc<Notify>,
    pub shutdown: watch::Sender<bool>,
}
