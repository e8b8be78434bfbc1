use std::path::{Path, PathBuf};

use tflitec::interpreter::{Interpreter, Options};
use tflitec::model::Model;
use tflitec::tensor::Shape;

use super::{ModelScore, ScoreProducer};

/// Melspectrogram frame count stacked into one wakeword inference: matches
/// the `hey_mycroft` model shape of 16 embedding frames x 96 features.
const WAKEWORD_INPUT_LEN: usize = 1536;

struct LoadedModel<'a> {
    id: String,
    wakeword_model: Model<'a>,
    melspec_model: Model<'a>,
    default_threshold: f32,
    history: Vec<f32>,
}

/// Loads one `tflite` wakeword/melspectrogram model pair per subdirectory of
/// a configured models directory, named by its stable id. A model
/// whose files fail to load is skipped with a single warning rather than
/// aborting the whole scorer.
pub struct TfliteScoreProducer<'a> {
    models: Vec<LoadedModel<'a>>,
}

impl<'a> TfliteScoreProducer<'a> {
    pub fn load_from_dir(dir: &Path) -> Self {
        let mut models = Vec::new();
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) => {
                log::warn!("wakeword models dir {} unreadable: {e}, wake-word detection disabled", dir.display());
                return Self { models };
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let id = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("unknown")
                .to_string();

            match Self::load_one(&path) {
                Ok(loaded) => {
                    log::info!("loaded wakeword model `{id}`");
                    models.push(loaded);
                }
                Err(e) => {
                    log::warn!("failed to load wakeword model `{id}`: {e}, skipping");
                }
            }
        }

        Self { models }
    }

    fn load_one(dir: &PathBuf) -> Result<LoadedModel<'a>, String> {
        let wakeword_path = dir.join("wakeword.tflite");
        let melspec_path = dir.join("melspectrogram.tflite");

        let wakeword_model = Model::new(wakeword_path.to_string_lossy().as_ref())
            .map_err(|e| format!("wakeword.tflite: {e}"))?;
        let melspec_model = Model::new(melspec_path.to_string_lossy().as_ref())
            .map_err(|e| format!("melspectrogram.tflite: {e}"))?;

        let id = dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        Ok(LoadedModel {
            id,
            wakeword_model,
            melspec_model,
            default_threshold: 0.5,
            history: Vec::new(),
        })
    }

    fn run_melspec(model: &Model, block: &[f32]) -> Result<Vec<f32>, String> {
        let mut options = Options::default();
        options.thread_count = 1;
        let interpreter =
            Interpreter::new(model, Some(options)).map_err(|e| format!("melspec interpreter: {e}"))?;
        interpreter
            .resize_input(0, Shape::new(vec![1, block.len()]))
            .map_err(|e| format!("melspec resize: {e}"))?;
        interpreter
            .allocate_tensors()
            .map_err(|e| format!("melspec allocate: {e}"))?;
        interpreter
            .copy(block, 0)
            .map_err(|e| format!("melspec copy: {e}"))?;
        interpreter.invoke().map_err(|e| format!("melspec invoke: {e}"))?;
        let output = interpreter.output(0).map_err(|e| format!("melspec output: {e}"))?;
        Ok(output.data::<f32>().to_vec())
    }

    fn run_wakeword(model: &Model, features: &[f32]) -> Result<f32, String> {
        let mut options = Options::default();
        options.thread_count = 1;
        let interpreter =
            Interpreter::new(model, Some(options)).map_err(|e| format!("wakeword interpreter: {e}"))?;
        interpreter
            .resize_input(0, Shape::new(vec![1, WAKEWORD_INPUT_LEN]))
            .map_err(|e| format!("wakeword resize: {e}"))?;
        interpreter
            .allocate_tensors()
            .map_err(|e| format!("wakeword allocate: {e}"))?;
        interpreter
            .copy(features, 0)
            .map_err(|e| format!("wakeword copy: {e}"))?;
        interpreter.invoke().map_err(|e| format!("wakeword invoke: {e}"))?;
        let output = interpreter.output(0).map_err(|e| format!("wakeword output: {e}"))?;
        let data = output.data::<f32>();
        if data.is_empty() {
            return Err("empty wakeword output".into());
        }
        Ok(data[0].clamp(0.0, 1.0))
    }
}

impl<'a> ScoreProducer for TfliteScoreProducer<'a> {
    fn model_ids(&self) -> Vec<(String, f32)> {
        self.models
            .iter()
            .map(|m| (m.id.clone(), m.default_threshold))
            .collect()
    }

    fn score(&mut self, block: &[f32]) -> Vec<ModelScore> {
        let mut out = Vec::new();
        for model in &mut self.models {
            let features = match Self::run_melspec(&model.melspec_model, block) {
                Ok(f) => f,
                Err(e) => {
                    log::warn!("model `{}` melspec failed: {e}", model.id);
                    continue;
                }
            };

            model.history.extend_from_slice(&features);
            let feature_len = features.len().max(1);
            let frames_needed = WAKEWORD_INPUT_LEN / feature_len.min(WAKEWORD_INPUT_LEN).max(1);
            let keep = frames_needed.max(1) * feature_len;
            if model.history.len() > keep {
                let excess = model.history.len() - keep;
                model.history.drain(0..excess);
            }
            if model.history.len() < WAKEWORD_INPUT_LEN {
                continue;
            }

            let window = &model.history[model.history.len() - WAKEWORD_INPUT_LEN..];
            match Self::run_wakeword(&model.wakeword_model, window) {
                Ok(score) => out.push(ModelScore {
                    model_id: model.id.clone(),
                    score,
                }),
                Err(e) => log::warn!("model `{}` inference failed: {e}", model.id),
            }
        }
        out
    }
}
