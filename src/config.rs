use std::{
    env,
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::model::{BoosterParams, ParamGrid};

const DATA_DIR: &str = "EMAIL_DISCRIMINATOR_DATA_DIR";
const MODEL_PATH: &str = "EMAIL_DISCRIMINATOR_MODEL_PATH";
const MIN_F1: &str = "EMAIL_DISCRIMINATOR_MIN_F1";
const THRESHOLD_STEP: &str = "EMAIL_DISCRIMINATOR_THRESHOLD_STEP";
const TEST_SIZE: &str = "EMAIL_DISCRIMINATOR_TEST_SIZE";
const RANDOM_SEED: &str = "EMAIL_DISCRIMINATOR_RANDOM_SEED";
const OVERSAMPLE: &str = "EMAIL_DISCRIMINATOR_OVERSAMPLE";
const CV_FOLDS: &str = "EMAIL_DISCRIMINATOR_CV_FOLDS";
const GRID_N_ESTIMATORS: &str = "EMAIL_DISCRIMINATOR_GRID_N_ESTIMATORS";
const GRID_LEARNING_RATES: &str = "EMAIL_DISCRIMINATOR_GRID_LEARNING_RATES";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    data_dir: PathBuf,
    model_path: PathBuf,
    min_f1: f64,
    threshold_step: f64,
    test_size: f64,
    random_seed: u64,
    oversample: bool,
    cv_folds: usize,
    grid_n_estimators: Vec<usize>,
    grid_learning_rates: Vec<f64>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl Config {
    /// 環境変数から学習・推論の設定値を読み込み、検証する。
    ///
    /// すべて任意で、未設定の項目は既定値を使う。
    ///
    /// # Errors
    /// 値のパースに失敗した場合、もしくは範囲外の場合は [`ConfigError`] を返す。
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = PathBuf::from(env::var(DATA_DIR).unwrap_or_else(|_| "data".to_string()));
        let model_path = PathBuf::from(
            env::var(MODEL_PATH).unwrap_or_else(|_| "models/email_discriminator.json".to_string()),
        );
        let min_f1 = parse_unit_interval(MIN_F1, 0.75)?;
        let threshold_step = parse_unit_interval(THRESHOLD_STEP, 0.01)?;
        let test_size = parse_unit_interval(TEST_SIZE, 0.2)?;
        let random_seed = parse_u64(RANDOM_SEED, 42)?;
        let oversample = parse_bool(OVERSAMPLE, true)?;
        let cv_folds = parse_usize(CV_FOLDS, 3)?;
        if cv_folds < 2 {
            return Err(ConfigError::Invalid {
                name: CV_FOLDS,
                source: anyhow::anyhow!("at least 2 folds are required, got {cv_folds}"),
            });
        }
        let grid_n_estimators = parse_csv_list(GRID_N_ESTIMATORS, "100,200,300")?;
        if grid_n_estimators.contains(&0) {
            return Err(ConfigError::Invalid {
                name: GRID_N_ESTIMATORS,
                source: anyhow::anyhow!("every entry must be greater than zero"),
            });
        }
        let grid_learning_rates: Vec<f64> = parse_csv_list(GRID_LEARNING_RATES, "0.01,0.1,0.2")?;
        if grid_learning_rates.iter().any(|rate| !(*rate > 0.0 && rate.is_finite())) {
            return Err(ConfigError::Invalid {
                name: GRID_LEARNING_RATES,
                source: anyhow::anyhow!("every entry must be a positive number"),
            });
        }

        Ok(Self {
            data_dir,
            model_path,
            min_f1,
            threshold_step,
            test_size,
            random_seed,
            oversample,
            cv_folds,
            grid_n_estimators,
            grid_learning_rates,
        })
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    #[must_use]
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    #[must_use]
    pub fn min_f1(&self) -> f64 {
        self.min_f1
    }

    #[must_use]
    pub fn threshold_step(&self) -> f64 {
        self.threshold_step
    }

    #[must_use]
    pub fn test_size(&self) -> f64 {
        self.test_size
    }

    #[must_use]
    pub fn random_seed(&self) -> u64 {
        self.random_seed
    }

    #[must_use]
    pub fn oversample(&self) -> bool {
        self.oversample
    }

    #[must_use]
    pub fn cv_folds(&self) -> usize {
        self.cv_folds
    }

    /// グリッドサーチの探索範囲。
    #[must_use]
    pub fn param_grid(&self) -> ParamGrid {
        ParamGrid {
            n_estimators: self.grid_n_estimators.clone(),
            learning_rates: self.grid_learning_rates.clone(),
        }
    }

    /// 探索候補の一覧。探索しない値は推定器の既定値。
    #[must_use]
    pub fn booster_candidates(&self) -> Vec<BoosterParams> {
        self.param_grid().candidates(BoosterParams::default())
    }
}

fn parse_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_usize(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<usize>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

/// 開区間 (0, 1) の小数。
fn parse_unit_interval(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let parsed = raw.parse::<f64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })?;
    if !(parsed > 0.0 && parsed < 1.0) {
        return Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("value must be between 0 and 1 (exclusive), got {parsed}"),
        });
    }
    Ok(parsed)
}

fn parse_bool(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("invalid boolean value: {raw}"),
        }),
    }
}

fn parse_csv_list<T>(name: &'static str, default: &str) -> Result<Vec<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let values = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<T>().map_err(|error| ConfigError::Invalid {
                name,
                source: anyhow::Error::new(error),
            })
        })
        .collect::<Result<Vec<T>, _>>()?;
    if values.is_empty() {
        return Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("at least one value is required"),
        });
    }
    Ok(values)
}
