//! JSON output formatting

use serde::Serialize;
use tunematch_core::{CacheKey, ClipReport, MatchResult};

/// Result document printed by `fpmatch`
#[derive(Debug, Serialize)]
pub struct MatchOutput {
    pub query_path: String,
    pub duration_secs: f64,
    pub windows: usize,
    pub cache_key: CacheKey,
    pub detections: usize,
    pub results: Vec<MatchResult>,
}

impl MatchOutput {
    /// Results are listed in chronological order of where they start
    pub fn new(query_path: &str, report: ClipReport, cache_key: CacheKey) -> Self {
        let mut results = report.matches;
        results.sort_by(|a, b| {
            a.start_time
                .total_cmp(&b.start_time)
                .then(b.confidence.total_cmp(&a.confidence))
        });

        Self {
            query_path: query_path.to_string(),
            duration_secs: report.duration_secs,
            windows: report.windows,
            cache_key,
            detections: results.len(),
            results,
        }
    }
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing output: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunematch_core::FingerprintSummary;

    fn result(track_id: u32, start_time: f64, confidence: f64) -> MatchResult {
        MatchResult {
            track_id,
            title: format!("track {}", track_id),
            confidence,
            start_time,
            end_time: start_time + 3.0,
            window_index: 0,
            index_version: 1,
            generated_at: "2024-01-01T00:00:00Z".parse().unwrap(),
        }
    }

    #[test]
    fn test_results_in_chronological_order() {
        let report = ClipReport {
            matches: vec![result(1, 40.0, 0.9), result(2, 12.5, 0.4)],
            summary: FingerprintSummary::default(),
            windows: 3,
            duration_secs: 5.0,
        };
        let key = CacheKey::derive(&report.summary, 8000, 1);
        let output = MatchOutput::new("clip.wav", report, key.clone());

        assert_eq!(output.detections, 2);
        assert_eq!(output.results[0].track_id, 2);
        assert_eq!(output.results[1].track_id, 1);

        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["cache_key"], key.as_str());
        assert_eq!(json["query_path"], "clip.wav");
        assert_eq!(json["results"][0]["title"], "track 2");
    }
}
