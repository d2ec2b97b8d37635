use std::env;
use std::str::FromStr;

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::ddag::common::error::Result;
use crate::ddag::fit::{BoostingConfig, ClassifierKind, FitMethod, ForestConfig, LogisticConfig};
use crate::ddag::inference::EliminationSchedule;

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|raw| raw.trim().parse().ok())
}

/// Settings for [`crate::DiscreteDag::fit`].
#[derive(Debug, Clone, PartialEq)]
pub struct FitConfig {
    /// One of `mle`, `add_one_mle`, `logistic`, `random_forest`, `xgboost`.
    pub method: String,
    pub alpha: f64,
    pub logistic: LogisticConfig,
    pub forest: ForestConfig,
    pub boosting: BoostingConfig,
}

impl Default for FitConfig {
    fn default() -> Self {
        FitConfig {
            method: "mle".to_string(),
            alpha: 1.0,
            logistic: LogisticConfig::default(),
            forest: ForestConfig::default(),
            boosting: BoostingConfig::default(),
        }
    }
}

impl FitConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(method) = env::var("BAYESDAG_FIT_METHOD") {
            config.method = method.trim().to_lowercase();
        }
        if let Some(alpha) = env_parse("BAYESDAG_ALPHA") {
            config.alpha = alpha;
        }
        if let Some(lr) = env_parse::<f64>("BAYESDAG_LEARNING_RATE") {
            config.logistic.learning_rate = lr;
            config.boosting.learning_rate = lr;
        }
        if let Some(epochs) = env_parse("BAYESDAG_EPOCHS") {
            config.logistic.epochs = epochs;
        }
        if let Some(n_trees) = env_parse("BAYESDAG_N_TREES") {
            config.forest.n_trees = n_trees;
        }
        if let Some(depth) = env_parse::<usize>("BAYESDAG_MAX_DEPTH") {
            config.forest.max_depth = depth;
            config.boosting.max_depth = depth;
        }
        if let Some(rounds) = env_parse("BAYESDAG_N_ROUNDS") {
            config.boosting.n_rounds = rounds;
        }

        config
    }

    /// The method tag resolved against the configured hyper-parameters.
    pub fn fit_method(&self) -> Result<FitMethod> {
        Ok(match self.method.parse::<FitMethod>()? {
            FitMethod::Mle => FitMethod::Mle,
            FitMethod::AddOneMle { .. } => FitMethod::AddOneMle { alpha: self.alpha },
            FitMethod::Supervised(ClassifierKind::Logistic(_)) => {
                FitMethod::Supervised(ClassifierKind::Logistic(self.logistic))
            }
            FitMethod::Supervised(ClassifierKind::RandomForest(_)) => {
                FitMethod::Supervised(ClassifierKind::RandomForest(self.forest))
            }
            FitMethod::Supervised(ClassifierKind::GradientBoosting(_)) => {
                FitMethod::Supervised(ClassifierKind::GradientBoosting(self.boosting))
            }
        })
    }
}

/// Settings shared by the query operations.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceConfig {
    pub schedule: EliminationSchedule,
    pub nparticles: usize,
    /// Fixed seed for reproducible sampling; entropy-seeded when `None`.
    pub seed: Option<u64>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        InferenceConfig {
            schedule: EliminationSchedule::default(),
            nparticles: 1000,
            seed: None,
        }
    }
}

impl InferenceConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(schedule) = env_parse("BAYESDAG_SCHEDULE") {
            config.schedule = schedule;
        }
        if let Some(nparticles) = env_parse("BAYESDAG_NPARTICLES") {
            config.nparticles = nparticles;
        }
        if let Some(seed) = env_parse("BAYESDAG_SEED") {
            config.seed = Some(seed);
        }

        config
    }

    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}
