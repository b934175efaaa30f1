//! 소형 다층 퍼셉트론 (회귀).
//!
//! 정규화된 feature 벡터 → [0, 1] 스칼라. 출력층은 항상 sigmoid이며
//! 전체 배치 경사하강법과 MSE 손실로 학습합니다.

use crate::ml::error::{MlError, MlResult};
use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// 은닉층 활성화 함수.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// 1 / (1 + exp(-x))
    Sigmoid,
    /// max(0, x)
    Relu,
    /// max(0.01x, x)
    LeakyRelu,
    /// tanh(x)
    Tanh,
}

impl Activation {
    fn apply(&self, x: f64) -> f64 {
        match self {
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::Relu => x.max(0.0),
            Activation::LeakyRelu => {
                if x > 0.0 {
                    x
                } else {
                    0.01 * x
                }
            }
            Activation::Tanh => x.tanh(),
        }
    }

    /// 활성화 이전 값 z에서의 도함수.
    fn derivative(&self, z: f64) -> f64 {
        match self {
            Activation::Sigmoid => {
                let s = self.apply(z);
                s * (1.0 - s)
            }
            Activation::Relu => {
                if z > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::LeakyRelu => {
                if z > 0.0 {
                    1.0
                } else {
                    0.01
                }
            }
            Activation::Tanh => 1.0 - z.tanh().powi(2),
        }
    }
}

/// 완전 연결층.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    /// (input_size × output_size)
    pub weights: Array2<f64>,
    pub biases: Array1<f64>,
    pub activation: Activation,
}

impl DenseLayer {
    /// Xavier 균등 분포로 초기화합니다.
    pub fn new<R: Rng>(
        input_size: usize,
        output_size: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Self {
        let limit = (6.0 / (input_size + output_size) as f64).sqrt();
        let weights = Array2::from_shape_fn((input_size, output_size), |_| {
            rng.gen_range(-limit..limit)
        });

        Self {
            weights,
            biases: Array1::zeros(output_size),
            activation,
        }
    }

    /// (z, activation(z))를 반환합니다.
    fn forward(&self, input: &Array2<f64>) -> (Array2<f64>, Array2<f64>) {
        let mut z = input.dot(&self.weights);
        for mut row in z.rows_mut() {
            row += &self.biases;
        }
        let activation = self.activation;
        let output = z.mapv(|v| activation.apply(v));
        (z, output)
    }
}

/// 학습 루프 파라미터.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainParams {
    pub learning_rate: f64,
    pub iterations: usize,
    pub error_threshold: f64,
}

/// 학습 결과 요약.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingOutcome {
    /// 실제 수행한 반복 수
    pub iterations: usize,
    /// 마지막 MSE
    pub final_error: f64,
}

/// 피드포워드 네트워크.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    input_size: usize,
    layers: Vec<DenseLayer>,
}

impl Network {
    /// 은닉층 구성과 활성화 함수로 네트워크를 생성합니다.
    ///
    /// 출력층은 뉴런 1개, sigmoid입니다.
    pub fn new<R: Rng>(
        input_size: usize,
        hidden_layers: &[usize],
        activation: Activation,
        rng: &mut R,
    ) -> Self {
        let mut layers = Vec::with_capacity(hidden_layers.len() + 1);
        let mut prev = input_size;
        for &size in hidden_layers {
            layers.push(DenseLayer::new(prev, size, activation, rng));
            prev = size;
        }
        layers.push(DenseLayer::new(prev, 1, Activation::Sigmoid, rng));

        Self { input_size, layers }
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    /// 배치 예측. 입력은 (샘플 수 × input_size).
    pub fn predict(&self, inputs: &Array2<f64>) -> MlResult<Array1<f64>> {
        self.check_input(inputs)?;
        let mut output = inputs.clone();
        for layer in &self.layers {
            output = layer.forward(&output).1;
        }
        Ok(output.column(0).to_owned())
    }

    /// 단일 샘플 예측.
    pub fn predict_one(&self, input: &[f64]) -> MlResult<f64> {
        let inputs = Array2::from_shape_vec((1, input.len()), input.to_vec())
            .map_err(|e| MlError::InvalidInput(e.to_string()))?;
        let output = self.predict(&inputs)?;
        Ok(output[0])
    }

    /// 전체 배치 경사하강법으로 학습합니다.
    ///
    /// MSE가 `error_threshold` 아래로 내려가면 조기 종료합니다.
    pub fn train(
        &mut self,
        inputs: &Array2<f64>,
        targets: &Array1<f64>,
        params: TrainParams,
    ) -> MlResult<TrainingOutcome> {
        self.check_input(inputs)?;
        if inputs.nrows() != targets.len() || targets.is_empty() {
            return Err(MlError::InvalidInput(format!(
                "{} samples but {} targets",
                inputs.nrows(),
                targets.len()
            )));
        }

        let n = targets.len() as f64;
        let targets = targets.clone().insert_axis(Axis(1));
        let mut final_error = f64::INFINITY;
        let mut iterations = 0;

        while iterations < params.iterations {
            // 순전파: 각 층의 입력과 z를 보관
            let mut layer_inputs = Vec::with_capacity(self.layers.len());
            let mut pre_activations = Vec::with_capacity(self.layers.len());
            let mut output = inputs.clone();
            for layer in &self.layers {
                let (z, a) = layer.forward(&output);
                layer_inputs.push(output);
                pre_activations.push(z);
                output = a;
            }

            let diff = &output - &targets;
            final_error = diff.mapv(|d| d * d).sum() / n;
            if !final_error.is_finite() {
                return Err(MlError::Training(format!(
                    "loss diverged at iteration {}",
                    iterations
                )));
            }
            if final_error < params.error_threshold {
                break;
            }

            // 역전파
            let mut grad = diff * (2.0 / n);
            for (idx, layer) in self.layers.iter_mut().enumerate().rev() {
                let activation = layer.activation;
                let delta = grad * &pre_activations[idx].mapv(|z| activation.derivative(z));
                let weight_grad = layer_inputs[idx].t().dot(&delta);
                let bias_grad = delta.sum_axis(Axis(0));
                grad = delta.dot(&layer.weights.t());

                layer.weights.scaled_add(-params.learning_rate, &weight_grad);
                layer.biases.scaled_add(-params.learning_rate, &bias_grad);
            }

            iterations += 1;
        }

        Ok(TrainingOutcome {
            iterations,
            final_error,
        })
    }

    fn check_input(&self, inputs: &Array2<f64>) -> MlResult<()> {
        if inputs.ncols() != self.input_size {
            return Err(MlError::InvalidInput(format!(
                "expected {} features, got {}",
                self.input_size,
                inputs.ncols()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_network_shapes() {
        let mut rng = StdRng::seed_from_u64(7);
        let network = Network::new(6, &[8, 4], Activation::Relu, &mut rng);
        let inputs = Array2::from_elem((3, 6), 0.5);
        let output = network.predict(&inputs).unwrap();

        assert_eq!(output.len(), 3);
        assert!(output.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_wrong_input_size_rejected() {
        let mut rng = StdRng::seed_from_u64(7);
        let network = Network::new(6, &[4], Activation::Tanh, &mut rng);
        assert!(network.predict_one(&[0.1, 0.2]).is_err());
    }

    #[test]
    fn test_training_reduces_error() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut network = Network::new(2, &[8], Activation::Tanh, &mut rng);

        // y = (x0 + x1) / 2
        let inputs = Array2::from_shape_fn((40, 2), |(i, j)| ((i * (j + 3)) % 10) as f64 / 10.0);
        let targets: Array1<f64> = inputs.rows().into_iter().map(|r| (r[0] + r[1]) / 2.0).collect();

        let params = TrainParams {
            learning_rate: 0.5,
            iterations: 1,
            error_threshold: 0.0,
        };
        let before = network.clone().train(&inputs, &targets, params).unwrap().final_error;

        let outcome = network
            .train(
                &inputs,
                &targets,
                TrainParams {
                    iterations: 2000,
                    ..params
                },
            )
            .unwrap();

        assert!(outcome.final_error < before);
    }

    #[test]
    fn test_early_stop_on_threshold() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut network = Network::new(1, &[2], Activation::Sigmoid, &mut rng);
        let inputs = Array2::from_elem((4, 1), 0.5);
        let targets = Array1::from_elem(4, 0.5);

        let outcome = network
            .train(
                &inputs,
                &targets,
                TrainParams {
                    learning_rate: 0.1,
                    iterations: 100,
                    error_threshold: 1.0,
                },
            )
            .unwrap();
        assert_eq!(outcome.iterations, 0);
    }

    #[test]
    fn test_serde_preserves_predictions() {
        let mut rng = StdRng::seed_from_u64(3);
        let network = Network::new(3, &[4], Activation::LeakyRelu, &mut rng);
        let json = serde_json::to_string(&network).unwrap();
        let restored: Network = serde_json::from_str(&json).unwrap();

        let input = [0.2, 0.4, 0.6];
        let a = network.predict_one(&input).unwrap();
        let b = restored.predict_one(&input).unwrap();
        assert!((a - b).abs() < 1e-12);
    }
}
