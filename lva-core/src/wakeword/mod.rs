mod tflite_producer;

pub use tflite_producer::TfliteScoreProducer;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::{Config, ThresholdPreset};

/// A single model's raw output for one audio block.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelScore {
    pub model_id: String,
    pub score: f32,
}

/// The inference kernel is an out-of-scope collaborator; everything
/// downstream of it talks to this trait so the scorer never depends on
/// `tflitec` directly.
pub trait ScoreProducer: Send {
    /// Every registered model's stable id and its built-in default
    /// threshold, used when a model's preset resolves to `ModelDefault`.
    fn model_ids(&self) -> Vec<(String, f32)>;

    /// Scores one audio block against every loaded model. Models whose load
    /// failed earlier are simply absent from `model_ids()`/the result.
    fn score(&mut self, block: &[f32]) -> Vec<ModelScore>;
}

/// Always reports zero models: used in tests and when no models directory
/// is configured, so wake-word detection disables itself rather than the
/// core treating the scorer as a hard dependency.
#[derive(Default)]
pub struct NullScoreProducer;

impl ScoreProducer for NullScoreProducer {
    fn model_ids(&self) -> Vec<(String, f32)> {
        Vec::new()
    }

    fn score(&mut self, _block: &[f32]) -> Vec<ModelScore> {
        Vec::new()
    }
}

const LOG_THROTTLE: Duration = Duration::from_millis(300);

/// Smooths and thresholds raw per-model scores into `WakeWord` triggers
///. Owns no audio I/O; the capture loop feeds it blocks and reads
/// back any detections.
pub struct WakewordScorer<'a> {
    producer: Box<dyn ScoreProducer + 'a>,
    last_logged: HashMap<String, Instant>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub model_id: String,
    pub score: f32,
}

impl<'a> WakewordScorer<'a> {
    pub fn new(producer: Box<dyn ScoreProducer + 'a>) -> Self {
        Self {
            producer,
            last_logged: HashMap::new(),
        }
    }

    /// Feeds one audio block and returns any models whose smoothed score
    /// crossed their effective threshold this block.
    pub fn process_block(&mut self, block: &[f32], config: &Config) -> Vec<Detection> {
        let defaults: HashMap<String, f32> = self.producer.model_ids().into_iter().collect();
        let scores = self.producer.score(block);
        let mut detections = Vec::new();

        for ModelScore { model_id, score } in scores {
            let now = Instant::now();
            let should_log = self
                .last_logged
                .get(&model_id)
                .map(|t| now.duration_since(*t) >= LOG_THROTTLE)
                .unwrap_or(true);
            if should_log {
                log::debug!("wakeword model `{model_id}` score={score:.3}");
                self.last_logged.insert(model_id.clone(), now);
            }

            let model_default = defaults.get(&model_id).copied().unwrap_or(0.5);
            let threshold = effective_threshold_for(config, model_default);
            if score >= threshold {
                detections.push(Detection { model_id, score });
            }
        }

        detections
    }
}

fn effective_threshold_for(config: &Config, model_default: f32) -> f32 {
    match config.wake_word_threshold_preset {
        ThresholdPreset::ModelDefault => model_default,
        ThresholdPreset::Custom => config.custom_threshold,
        other => other.fixed_value().unwrap_or(model_default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProducer {
        models: Vec<(String, f32)>,
        next: Vec<ModelScore>,
    }

    impl ScoreProducer for FixedProducer {
        fn model_ids(&self) -> Vec<(String, f32)> {
            self.models.clone()
        }
        fn score(&mut self, _block: &[f32]) -> Vec<ModelScore> {
            self.next.clone()
        }
    }

    #[test]
    fn score_above_threshold_is_a_detection() {
        let producer = FixedProducer {
            models: vec![("hey_mycroft".into(), 0.5)],
            next: vec![ModelScore { model_id: "hey_mycroft".into(), score: 0.72 }],
        };
        let mut scorer = WakewordScorer::new(Box::new(producer));
        let config = Config::default();
        let dets = scorer.process_block(&[0.0; 1280], &config);
        assert_eq!(dets, vec![Detection { model_id: "hey_mycroft".into(), score: 0.72 }]);
    }

    #[test]
    fn score_below_threshold_is_not_a_detection() {
        let producer = FixedProducer {
            models: vec![("hey_mycroft".into(), 0.5)],
            next: vec![ModelScore { model_id: "hey_mycroft".into(), score: 0.2 }],
        };
        let mut scorer = WakewordScorer::new(Box::new(producer));
        let config = Config::default();
        assert!(scorer.process_block(&[0.0; 1280], &config).is_empty());
    }

    #[test]
    fn custom_preset_uses_custom_threshold_not_model_default() {
        let producer = FixedProducer {
            models: vec![("hey_mycroft".into(), 0.9)],
            next: vec![ModelScore { model_id: "hey_mycroft".into(), score: 0.6 }],
        };
        let mut scorer = WakewordScorer::new(Box::new(producer));
        let mut config = Config::default();
        config.wake_word_threshold_preset = ThresholdPreset::Custom;
        config.custom_threshold = 0.5;
        assert_eq!(scorer.process_block(&[0.0; 1280], &config).len(), 1);
    }

    #[test]
    fn null_producer_never_detects() {
        let mut scorer = WakewordScorer::new(Box::new(NullScoreProducer));
        let config = Config::default();
        assert!(scorer.process_block(&[0.0; 1280], &config).is_empty());
    }
}
