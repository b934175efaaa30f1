//! 하이퍼파라미터 탐색과 모델 학습/평가.
//!
//! 데이터는 섞지 않고 위치로 나눕니다. 앞 80%가 학습, 뒤 20%가 평가이며
//! 탐색의 각 시도는 학습 구간을 다시 70/30으로 나눕니다.

use crate::ml::error::{MlError, MlResult};
use crate::ml::features::{normalize_features, LABEL_RANGE};
use crate::ml::guard::MemoryGuard;
use crate::ml::network::{Activation, Network, TrainParams};
use crate::ml::types::{
    ConfidenceInterval, Hyperparameters, PerformanceMetrics, TrainingSample, FEATURE_COUNT,
};
use crosswatch_core::MlConfig;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// 평가 구간 비율 (%).
pub const TEST_PERCENT: usize = 20;
/// 시도별 검증 구간 비율 (%).
pub const VALIDATION_PERCENT: usize = 30;

/// 뒤쪽 holdout 구간 길이: ⌈len × percent / 100⌉.
pub fn holdout_len(len: usize, percent: usize) -> usize {
    (len * percent + 99) / 100
}

/// 이산 탐색 공간.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub hidden_layers: Vec<Vec<usize>>,
    pub learning_rates: Vec<f64>,
    pub activations: Vec<Activation>,
    pub iterations: Vec<usize>,
    pub error_thresholds: Vec<f64>,
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self {
            hidden_layers: vec![vec![8], vec![16], vec![8, 4], vec![16, 8], vec![32, 16]],
            learning_rates: vec![0.001, 0.003, 0.01, 0.03],
            activations: vec![
                Activation::Sigmoid,
                Activation::Relu,
                Activation::LeakyRelu,
                Activation::Tanh,
            ],
            iterations: vec![500, 1000, 2000],
            error_thresholds: vec![0.005, 0.01, 0.02],
        }
    }
}

impl SearchSpace {
    /// 각 축에서 하나씩 무작위로 고릅니다. 빈 축은 보수적 기본값을 씁니다.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Hyperparameters {
        let fallback = Hyperparameters::degraded();
        Hyperparameters {
            hidden_layers: self
                .hidden_layers
                .choose(rng)
                .cloned()
                .unwrap_or(fallback.hidden_layers),
            learning_rate: self
                .learning_rates
                .choose(rng)
                .copied()
                .unwrap_or(fallback.learning_rate),
            activation: self
                .activations
                .choose(rng)
                .copied()
                .unwrap_or(fallback.activation),
            iterations: self
                .iterations
                .choose(rng)
                .copied()
                .unwrap_or(fallback.iterations),
            error_threshold: self
                .error_thresholds
                .choose(rng)
                .copied()
                .unwrap_or(fallback.error_threshold),
        }
    }
}

/// 학습기 설정.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainerConfig {
    /// 탐색 시도 횟수
    pub trials: usize,
    /// 최소 레이블 포인트 수
    pub min_points: usize,
    /// 재현용 시드
    pub seed: Option<u64>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            trials: 5,
            min_points: 100,
            seed: None,
        }
    }
}

impl From<&MlConfig> for TrainerConfig {
    fn from(config: &MlConfig) -> Self {
        Self {
            trials: config.trials,
            min_points: config.min_training_points,
            seed: config.search_seed,
        }
    }
}

/// 탐색 시도 하나의 결과.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialOutcome {
    pub hyperparameters: Hyperparameters,
    /// 검증 점수 (실패 시 없음)
    pub score: Option<f64>,
    /// 실패 사유
    pub error: Option<String>,
}

/// 학습된 모델과 평가 결과.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub network: Network,
    pub hyperparameters: Hyperparameters,
    pub metrics: PerformanceMetrics,
    pub trials: Vec<TrialOutcome>,
    /// 모든 시도가 실패해 기본 설정을 썼는지
    pub degraded: bool,
    /// 학습 구간 샘플 수
    pub training_samples: usize,
}

/// 하이퍼파라미터 탐색 + 최종 학습.
#[derive(Debug, Clone)]
pub struct Trainer {
    config: TrainerConfig,
    space: SearchSpace,
    guard: MemoryGuard,
}

impl Trainer {
    pub fn new(config: TrainerConfig, guard: MemoryGuard) -> Self {
        Self {
            config,
            space: SearchSpace::default(),
            guard,
        }
    }

    /// 탐색 공간을 교체합니다.
    pub fn with_space(mut self, space: SearchSpace) -> Self {
        self.space = space;
        self
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// 샘플(시간순)로 모델을 학습하고 평가합니다.
    ///
    /// # 에러
    /// * `InsufficientData` - 샘플이 `min_points`보다 적음
    /// * `ResourceExhausted` - 최종 학습 직전 메모리 상한 초과
    pub fn train(&self, samples: &[TrainingSample]) -> MlResult<TrainedModel> {
        if samples.len() < self.config.min_points.max(2) {
            return Err(MlError::InsufficientData {
                required: self.config.min_points.max(2),
                actual: samples.len(),
            });
        }

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let split = samples.len() - holdout_len(samples.len(), TEST_PERCENT);
        let (train, test) = samples.split_at(split);

        let (best, trials) = self.search(train, &mut rng);
        let degraded = best.is_none();
        let hyperparameters = best.unwrap_or_else(|| {
            warn!("All search trials failed; using degraded configuration");
            Hyperparameters::degraded()
        });

        self.guard.check()?;
        let network = fit(train, &hyperparameters, &mut rng)?;
        let metrics = evaluate(&network, test)?;

        info!(
            train = train.len(),
            test = test.len(),
            mae = metrics.mean_absolute_error,
            direction_accuracy = metrics.direction_accuracy,
            degraded,
            "Model trained"
        );

        Ok(TrainedModel {
            network,
            hyperparameters,
            metrics,
            trials,
            degraded,
            training_samples: train.len(),
        })
    }

    /// 무작위 시도 중 최고 점수 설정을 찾습니다.
    fn search(
        &self,
        train: &[TrainingSample],
        rng: &mut StdRng,
    ) -> (Option<Hyperparameters>, Vec<TrialOutcome>) {
        let split = train.len() - holdout_len(train.len(), VALIDATION_PERCENT);
        let (fit_part, validation) = train.split_at(split);

        let mut best: Option<(f64, Hyperparameters)> = None;
        let mut trials = Vec::with_capacity(self.config.trials);

        for trial in 0..self.config.trials {
            if let Err(e) = self.guard.check() {
                warn!(trial, error = %e, "Memory guard tripped; skipping remaining trials");
                break;
            }

            let hyperparameters = self.space.sample(rng);
            let result = fit(fit_part, &hyperparameters, rng)
                .and_then(|network| evaluate(&network, validation))
                .map(|metrics| metrics.score());

            match result {
                Ok(score) if score.is_finite() => {
                    debug!(trial, score, ?hyperparameters, "Trial finished");
                    if best.as_ref().map_or(true, |(s, _)| score > *s) {
                        best = Some((score, hyperparameters.clone()));
                    }
                    trials.push(TrialOutcome {
                        hyperparameters,
                        score: Some(score),
                        error: None,
                    });
                }
                Ok(score) => trials.push(TrialOutcome {
                    hyperparameters,
                    score: None,
                    error: Some(format!("non-finite score {}", score)),
                }),
                Err(e) => {
                    debug!(trial, error = %e, "Trial failed");
                    trials.push(TrialOutcome {
                        hyperparameters,
                        score: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        (best.map(|(_, hp)| hp), trials)
    }
}

/// 샘플을 정규화된 (입력, 목표) 행렬로 변환합니다.
pub fn to_matrices(samples: &[TrainingSample]) -> (Array2<f64>, Array1<f64>) {
    let mut inputs = Array2::zeros((samples.len(), FEATURE_COUNT));
    for (mut row, sample) in inputs.rows_mut().into_iter().zip(samples) {
        for (cell, value) in row.iter_mut().zip(normalize_features(&sample.features)) {
            *cell = value;
        }
    }
    let targets = samples
        .iter()
        .map(|s| LABEL_RANGE.normalize(s.label))
        .collect();
    (inputs, targets)
}

fn fit(
    samples: &[TrainingSample],
    hyperparameters: &Hyperparameters,
    rng: &mut StdRng,
) -> MlResult<Network> {
    let (inputs, targets) = to_matrices(samples);
    let mut network = Network::new(
        FEATURE_COUNT,
        &hyperparameters.hidden_layers,
        hyperparameters.activation,
        rng,
    );
    network.train(
        &inputs,
        &targets,
        TrainParams {
            learning_rate: hyperparameters.learning_rate,
            iterations: hyperparameters.iterations,
            error_threshold: hyperparameters.error_threshold,
        },
    )?;
    Ok(network)
}

/// 샘플에 대한 예측 성능을 계산합니다 (변화율 % 단위).
pub fn evaluate(network: &Network, samples: &[TrainingSample]) -> MlResult<PerformanceMetrics> {
    if samples.is_empty() {
        return Err(MlError::InsufficientData {
            required: 1,
            actual: 0,
        });
    }

    let (inputs, _) = to_matrices(samples);
    let predictions = network.predict(&inputs)?;

    let n = samples.len() as f64;
    let mut errors = Vec::with_capacity(samples.len());
    let mut correct = 0usize;
    for (sample, normalized) in samples.iter().zip(predictions.iter()) {
        let predicted = LABEL_RANGE.denormalize(*normalized);
        if (predicted > 0.0) == (sample.label > 0.0) {
            correct += 1;
        }
        errors.push(predicted - sample.label);
    }

    let abs_errors: Vec<f64> = errors.iter().map(|e| e.abs()).collect();
    let mae = abs_errors.iter().sum::<f64>() / n;
    let std_dev = sample_std(&errors);
    let margin = 1.96 * sample_std(&abs_errors) / n.sqrt();

    Ok(PerformanceMetrics {
        mean_absolute_error: mae,
        direction_accuracy: correct as f64 / n,
        confidence_interval_95: ConfidenceInterval {
            lower: mae - margin,
            upper: mae + margin,
        },
        std_dev,
        sample_count: samples.len(),
    })
}

fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::guard::FixedMemoryProbe;
    use crate::ml::types::FeatureSet;
    use std::sync::Arc;

    fn samples(n: usize) -> Vec<TrainingSample> {
        (0..n)
            .map(|i| {
                let x = ((i * 37) % 21) as f64 - 10.0;
                TrainingSample {
                    features: FeatureSet {
                        ema_diff: x / 2.0,
                        rsi: 50.0 + x * 3.0,
                        macd_hist: x / 20.0,
                        bb_width: 4.0,
                        atr: 1.0,
                        volume_change: (i % 7) as f64 * 10.0,
                    },
                    label: x * 0.8,
                }
            })
            .collect()
    }

    fn seeded(seed: u64) -> Trainer {
        Trainer::new(
            TrainerConfig {
                seed: Some(seed),
                ..Default::default()
            },
            MemoryGuard::unlimited(),
        )
    }

    #[test]
    fn test_holdout_len_rounds_up() {
        assert_eq!(holdout_len(100, 20), 20);
        assert_eq!(holdout_len(101, 20), 21);
        assert_eq!(holdout_len(80, 30), 24);
    }

    #[test]
    fn test_train_with_exactly_min_points() {
        let model = seeded(11).train(&samples(100)).unwrap();

        assert_eq!(model.metrics.sample_count, 20);
        assert_eq!(model.training_samples, 80);
        assert!((0.0..=1.0).contains(&model.metrics.direction_accuracy));
        assert_eq!(model.trials.len(), 5);
        assert!(!model.degraded);
    }

    #[test]
    fn test_insufficient_data_not_performed() {
        let err = seeded(1).train(&samples(99)).unwrap_err();
        assert!(err.is_not_performed());
    }

    #[test]
    fn test_seeded_search_is_reproducible() {
        let a = seeded(5).train(&samples(120)).unwrap();
        let b = seeded(5).train(&samples(120)).unwrap();
        assert_eq!(a.hyperparameters, b.hyperparameters);
        assert_eq!(a.metrics, b.metrics);
    }

    #[test]
    fn test_memory_guard_defers_training() {
        let guard = MemoryGuard::new(Arc::new(FixedMemoryProbe(u64::MAX)), 1);
        let trainer = Trainer::new(TrainerConfig::default(), guard);
        let err = trainer.train(&samples(100)).unwrap_err();
        assert!(err.is_deferral());
    }

    #[test]
    fn test_all_trials_failing_uses_degraded_config() {
        let space = SearchSpace {
            // 발산하는 학습률, 조기 종료 없음
            learning_rates: vec![f64::INFINITY],
            error_thresholds: vec![0.0],
            ..Default::default()
        };
        let model = seeded(3).with_space(space).train(&samples(100)).unwrap();
        assert!(model.degraded);
        assert_eq!(model.hyperparameters, Hyperparameters::degraded());
        assert!(model.trials.iter().all(|t| t.score.is_none()));
    }

    #[test]
    fn test_evaluate_empty_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let network = Network::new(FEATURE_COUNT, &[4], Activation::Relu, &mut rng);
        assert!(evaluate(&network, &[]).is_err());
    }
}
