pub mod rlimit;

/// Limit a child's resources from inside the child
///
/// `apply` runs in the forked child right before `execvp`, so implementations
/// may only make async-signal-safe calls: no allocation, no locking, no logging.
pub trait Limit {
  /// apply this limit to the calling process
  fn apply(&self) -> std::io::Result<()>;

  /// static message written to stderr by the child when `apply` fails
  fn failure_message(&self) -> &'static [u8];
}
