pub mod quote_resolver;
pub mod thread_lock;
pub mod thread_resolver;
pub mod transcript_reconciler;

pub use quote_resolver::QuoteResolver;
pub use thread_lock::{ThreadLockGuard, ThreadLockRegistry};
pub use thread_resolver::{ResolvedThread, ThreadResolver};
pub use transcript_reconciler::{ReconcilerConfig, TranscriptReconciler};
