use crate::{
    error::{BatchNormError, Result},
    running_stats::RunningStats,
};
use tch::{Kind, Tensor};

#[derive(Debug, Clone, Copy)]
pub struct BatchNormConfig {
    /// 防止方差为0时除零
    pub eps: f64,

    /// 移动统计量中旧值所占的权重
    pub momentum: f64,
}

impl Default for BatchNormConfig {
    fn default() -> Self {
        BatchNormConfig {
            eps: 1e-5,
            momentum: 0.9,
        }
    }
}

/// 对 `[batch_size, features]` 的输入按列做批量归一化，再进行缩放和平移。
///
/// 训练模式使用当前批次的均值和方差，并更新 `stats` 中 `layer` 对应的移动统计量；
/// 推理模式只读取移动统计量，当前批次的统计量不参与计算。
/// 方差为总体方差（除以 m），而不是样本方差。
pub fn batch_norm(
    xs: &Tensor,
    gamma: &Tensor,
    beta: &Tensor,
    stats: &mut RunningStats,
    layer: &str,
    config: BatchNormConfig,
    train: bool,
) -> Result<Tensor> {
    let features = check_features(xs, gamma, beta, layer)?;

    // 同一层的移动统计量必须和输入的特征数一致
    if let Some(running) = stats.get(layer) {
        if running.features() != features {
            return Err(BatchNormError::FeatureMismatch {
                layer: layer.to_string(),
                expected: running.features(),
                got: features,
            });
        }
    }

    let normalized = if train {
        let mean = xs.mean_dim([0i64].as_slice(), false, Kind::Float);
        let var = (xs - &mean).square().mean_dim([0i64].as_slice(), false, Kind::Float);
        let normalized = (xs - &mean) / (&var + config.eps).sqrt();

        stats.upsert(layer, &mean, &var, config.momentum)?;
        normalized
    } else {
        let running = stats
            .get(layer)
            .ok_or_else(|| BatchNormError::MissingStatistics {
                layer: layer.to_string(),
            })?;

        (xs - &running.mean) / (&running.var + config.eps).sqrt()
    };

    Ok(gamma * normalized + beta)
}

fn check_features(xs: &Tensor, gamma: &Tensor, beta: &Tensor, layer: &str) -> Result<i64> {
    let dims = xs.size();
    if dims.len() != 2 {
        return Err(BatchNormError::NotAMatrix {
            layer: layer.to_string(),
            dims,
        });
    }

    // 没有样本时均值和方差都是NaN
    if dims[0] == 0 {
        return Err(BatchNormError::EmptyBatch {
            layer: layer.to_string(),
        });
    }

    let features = dims[1];
    for param in [gamma, beta] {
        let shape = param.size();
        if shape != [features] {
            return Err(BatchNormError::ParamShape {
                layer: layer.to_string(),
                expected: vec![features],
                got: shape,
            });
        }
    }

    Ok(features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tch::Device;

    fn toy_matrix() -> Tensor {
        Tensor::from_slice(&[1.0_f32, 7., 5., 4., 6., 10.]).reshape([3, 2])
    }

    fn identity_affine(features: i64) -> (Tensor, Tensor) {
        (
            Tensor::ones([features], (Kind::Float, Device::Cpu)),
            Tensor::zeros([features], (Kind::Float, Device::Cpu)),
        )
    }

    #[test]
    fn toy_matrix_is_normalized_by_column() {
        let (gamma, beta) = identity_affine(2);
        let mut stats = RunningStats::new();

        let output = batch_norm(
            &toy_matrix(),
            &gamma,
            &beta,
            &mut stats,
            "toy",
            BatchNormConfig::default(),
            true,
        )
        .unwrap();

        let expected = [[-1.3887, 0.0], [0.4629, -1.2247], [0.9258, 1.2247]];
        assert_eq!(output.size(), vec![3, 2]);

        for (i, row) in expected.iter().enumerate() {
            for (j, &value) in row.iter().enumerate() {
                assert_abs_diff_eq!(
                    output.double_value(&[i as i64, j as i64]),
                    value,
                    epsilon = 1e-3
                );
            }
        }
    }

    #[test]
    fn constant_column_stays_finite() {
        let xs = Tensor::from_slice(&[3.0_f32, 1., 3., 2., 3., 3.]).reshape([3, 2]);
        let (gamma, beta) = identity_affine(2);
        let mut stats = RunningStats::new();

        let output = batch_norm(
            &xs,
            &gamma,
            &beta,
            &mut stats,
            "constant",
            BatchNormConfig::default(),
            true,
        )
        .unwrap();

        for i in 0..3 {
            assert_abs_diff_eq!(output.double_value(&[i, 0]), 0.0, epsilon = 1e-6);
        }
        assert_eq!(output.isnan().any().int64_value(&[]), 0);
    }

    #[test]
    fn scale_and_shift_are_applied() {
        let gamma = Tensor::from_slice(&[2.0_f32, 0.5]);
        let beta = Tensor::from_slice(&[1.0_f32, -1.]);
        let mut stats = RunningStats::new();

        let output = batch_norm(
            &toy_matrix(),
            &gamma,
            &beta,
            &mut stats,
            "affine",
            BatchNormConfig::default(),
            true,
        )
        .unwrap();

        assert_abs_diff_eq!(output.double_value(&[0, 0]), 2. * -1.3887 + 1., epsilon = 1e-3);
        assert_abs_diff_eq!(output.double_value(&[2, 1]), 0.5 * 1.2247 - 1., epsilon = 1e-3);
    }

    #[test]
    fn inference_without_training_fails() {
        let (gamma, beta) = identity_affine(2);
        let mut stats = RunningStats::new();

        let err = batch_norm(
            &toy_matrix(),
            &gamma,
            &beta,
            &mut stats,
            "layer1",
            BatchNormConfig::default(),
            false,
        )
        .unwrap_err();

        assert!(matches!(err, BatchNormError::MissingStatistics { layer } if layer == "layer1"));
        assert!(stats.is_empty());
    }

    #[test]
    fn mismatched_gamma_is_rejected() {
        let (gamma, beta) = identity_affine(3);
        let mut stats = RunningStats::new();

        let err = batch_norm(
            &toy_matrix(),
            &gamma,
            &beta,
            &mut stats,
            "layer1",
            BatchNormConfig::default(),
            true,
        )
        .unwrap_err();

        assert!(matches!(
            err,
            BatchNormError::ParamShape { expected, got, .. }
                if expected == vec![2] && got == vec![3]
        ));
    }

    #[test]
    fn retraining_with_other_width_is_rejected() {
        let mut stats = RunningStats::new();
        let config = BatchNormConfig::default();

        let (gamma, beta) = identity_affine(3);
        let wide = Tensor::randn([4, 3], (Kind::Float, Device::Cpu));
        batch_norm(&wide, &gamma, &beta, &mut stats, "layer1", config, true).unwrap();

        let (gamma, beta) = identity_affine(2);
        let narrow = Tensor::randn([4, 2], (Kind::Float, Device::Cpu));
        let err =
            batch_norm(&narrow, &gamma, &beta, &mut stats, "layer1", config, true).unwrap_err();

        assert!(matches!(
            err,
            BatchNormError::FeatureMismatch {
                expected: 3,
                got: 2,
                ..
            }
        ));
        assert_eq!(stats.get("layer1").unwrap().features(), 3);
    }

    #[test]
    fn gamma_must_be_a_vector() {
        let gamma = Tensor::ones([2, 1], (Kind::Float, Device::Cpu));
        let beta = Tensor::zeros([2], (Kind::Float, Device::Cpu));
        let mut stats = RunningStats::new();

        let err = batch_norm(
            &toy_matrix(),
            &gamma,
            &beta,
            &mut stats,
            "layer1",
            BatchNormConfig::default(),
            true,
        )
        .unwrap_err();

        assert!(matches!(err, BatchNormError::ParamShape { got, .. } if got == vec![2, 1]));
        assert!(stats.is_empty());
    }

    #[test]
    fn empty_batch_is_rejected() {
        let (gamma, beta) = identity_affine(2);
        let mut stats = RunningStats::new();

        let err = batch_norm(
            &Tensor::zeros([0, 2], (Kind::Float, Device::Cpu)),
            &gamma,
            &beta,
            &mut stats,
            "layer1",
            BatchNormConfig::default(),
            true,
        )
        .unwrap_err();

        assert!(matches!(err, BatchNormError::EmptyBatch { .. }));
        assert!(stats.is_empty());
    }

    #[test]
    fn vector_input_is_rejected() {
        let (gamma, beta) = identity_affine(2);
        let mut stats = RunningStats::new();

        let err = batch_norm(
            &Tensor::from_slice(&[1.0_f32, 2.]),
            &gamma,
            &beta,
            &mut stats,
            "layer1",
            BatchNormConfig::default(),
            true,
        )
        .unwrap_err();

        assert!(matches!(err, BatchNormError::NotAMatrix { .. }));
    }
}
