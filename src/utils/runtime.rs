use anyhow::Result;

/// The agent keeps everything on one thread: the local queue connection isn't shareable.
pub fn single_thread_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}
