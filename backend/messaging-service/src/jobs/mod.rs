pub mod self_destruct_reaper;

pub use self_destruct_reaper::{purge_expired_once, start_self_destruct_reaper};
