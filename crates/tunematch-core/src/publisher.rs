//! Window outcomes to client events

use crate::error::EngineError;
use crate::events::ServerEvent;
use crate::matching::MatchResult;
use crate::session::SessionStats;

/// Maps each analysed window, in window order, to the events it produces
#[derive(Debug, Default)]
pub struct ResultPublisher {
    session_id: u64,
    windows_published: u64,
    matches_published: u64,
}

impl ResultPublisher {
    pub fn new(session_id: u64) -> Self {
        Self {
            session_id,
            ..Default::default()
        }
    }

    /// Event for one window; windows without accepted matches stay quiet
    ///
    /// A missing index is reported as status, with the session's counters.
    pub fn publish(
        &mut self,
        outcome: Result<Vec<MatchResult>, EngineError>,
        stats: &SessionStats,
    ) -> Option<ServerEvent> {
        self.windows_published += 1;
        match outcome {
            Ok(results) if results.is_empty() => None,
            Ok(results) => {
                self.matches_published += results.len() as u64;
                if let Some(best) = results.first() {
                    log::info!(
                        "Session {}: window {} matched \"{}\" ({:.2}) at {:.1}s",
                        self.session_id,
                        best.window_index,
                        best.title,
                        best.confidence,
                        best.start_time
                    );
                }
                Some(ServerEvent::matches(results))
            }
            Err(EngineError::IndexUnavailable) => Some(ServerEvent::status(
                EngineError::IndexUnavailable.to_string(),
                stats,
                None,
            )),
            Err(e) => {
                log::warn!("Session {}: {}", self.session_id, e);
                Some(ServerEvent::error(e.to_string()))
            }
        }
    }

    /// Event for a rejected inbound chunk
    pub fn input_error(&self, error: &EngineError) -> ServerEvent {
        log::debug!("Session {}: {}", self.session_id, error);
        ServerEvent::error(error.to_string())
    }

    pub fn status(&self, message: &str, stats: &SessionStats, index_version: Option<u64>) -> ServerEvent {
        ServerEvent::status(message, stats, index_version)
    }

    pub fn windows_published(&self) -> u64 {
        self.windows_published
    }

    pub fn matches_published(&self) -> u64 {
        self.matches_published
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AudioError;
    use chrono::Utc;

    fn result(track_id: u32) -> MatchResult {
        MatchResult {
            track_id,
            title: format!("t{}", track_id),
            confidence: 0.8,
            start_time: 1.0,
            end_time: 4.0,
            window_index: 2,
            index_version: 1,
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn test_matches_become_one_event() {
        let mut publisher = ResultPublisher::new(1);
        let event = publisher.publish(Ok(vec![result(1), result(2)]), &SessionStats::default()).unwrap();
        match event {
            ServerEvent::Match { data } => assert_eq!(data.matches.len(), 2),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(publisher.matches_published(), 2);
    }

    #[test]
    fn test_empty_window_is_silent() {
        let mut publisher = ResultPublisher::new(1);
        assert!(publisher.publish(Ok(Vec::new()), &SessionStats::default()).is_none());
        assert_eq!(publisher.windows_published(), 1);
    }

    #[test]
    fn test_failures_are_reported() {
        let mut publisher = ResultPublisher::new(1);
        let internal = EngineError::Internal {
            window_index: 5,
            message: "worker panicked".to_string(),
        };
        let stats = SessionStats::default();
        assert_eq!(publisher.publish(Err(internal), &stats).unwrap().kind(), "error");
        assert_eq!(
            publisher.publish(Err(EngineError::IndexUnavailable), &stats).unwrap().kind(),
            "status"
        );

        let input = EngineError::from(AudioError::Empty);
        assert_eq!(publisher.input_error(&input).kind(), "error");
    }
}
