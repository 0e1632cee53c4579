//! The contract between chat surfaces and the text generator.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::EngineError;

/// Something that learns from lines of text and produces replies.
///
/// Every surface (files, console, IRC) funnels into these three calls.
/// Callers invoke them serially from one control flow.
pub trait Engine {
    /// Learn one line.
    fn train(&mut self, text: &str) -> Result<(), EngineError>;

    /// Learn a lazily produced, possibly unbounded sequence of lines.
    ///
    /// Stops early once `shutdown` is requested. Returns the number of
    /// lines consumed.
    fn train_many<I>(&mut self, texts: I, shutdown: &Shutdown) -> Result<usize, EngineError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut count = 0;
        for text in texts {
            if shutdown.is_requested() {
                break;
            }
            self.train(&text)?;
            count += 1;
        }
        Ok(count)
    }

    /// Generate a reply seeded by `seed`. An empty seed is valid.
    fn reply(&mut self, seed: &str) -> Result<String, EngineError>;
}

/// Cooperative stop flag, shared between a signal handler and whatever
/// long-running loop should notice it.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Request shutdown on the first Ctrl-C.
    pub fn on_ctrl_c(&self) {
        let flag = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, stopping");
                flag.request();
            }
        });
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! An engine that remembers what it was taught and answers with a
    //! canned line.

    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Default)]
    pub struct RecordingEngine {
        pub trained: Arc<Mutex<Vec<String>>>,
        pub seeds: Arc<Mutex<Vec<String>>>,
        pub answer: String,
    }

    impl RecordingEngine {
        pub fn answering(answer: &str) -> Self {
            Self {
                answer: answer.to_string(),
                ..Default::default()
            }
        }

        pub fn trained(&self) -> Vec<String> {
            self.trained.lock().unwrap().clone()
        }

        pub fn seeds(&self) -> Vec<String> {
            self.seeds.lock().unwrap().clone()
        }
    }

    impl Engine for RecordingEngine {
        fn train(&mut self, text: &str) -> Result<(), EngineError> {
            self.trained.lock().unwrap().push(text.to_string());
            Ok(())
        }

        fn reply(&mut self, seed: &str) -> Result<String, EngineError> {
            self.seeds.lock().unwrap().push(seed.to_string());
            Ok(self.answer.clone())
        }
    }
}
