//! In-process request queue shared by ingress and the dispatcher.

mod request_queue;

pub use request_queue::RequestQueue;
