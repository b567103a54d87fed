/// A unit of work posted to a strand.
pub type Task = Box<dyn FnOnce() + Send>;

/// A single-consumer serialization domain.
///
/// Functors posted to a strand execute in order on some unspecified thread
/// driving that strand. Callbacks for a socket with a strand set are posted
/// to it instead of running inline on the demultiplexer thread, giving a
/// total order over that socket's announcements.
///
/// An unset strand is a synonym for "run inline".
pub trait Strand: Send + Sync {
    /// Enqueues a functor to run after all previously enqueued functors.
    fn execute(&self, task: Task);
}
