use anyhow::{Context, Result};
use bnorm::{
    BatchNormConfig, EpochStats, Mlp, TrainConfig, evaluate_accuracy,
    mnist::{IMAGE_SIZE, MnistDataset, NUM_CLASSES},
    train_epoch,
};
use clap::Parser;
use std::path::PathBuf;
use tch::Device;

mod plot;

/// 在MNIST上训练带批量归一化的多层感知机
#[derive(Parser, Debug)]
#[command(name = "main")]
struct Args {
    #[arg(long, default_value_t = 10)]
    epochs: usize,

    #[arg(long, default_value_t = 64)]
    batch_size: i64,

    #[arg(long, default_value_t = 0.1)]
    learning_rate: f64,

    /// 隐藏层神经元数量
    #[arg(long, default_value_t = 256)]
    hidden: i64,

    /// 权重初始化的标准差
    #[arg(long, default_value_t = 0.01)]
    weight_scale: f64,

    /// 移动统计量中旧值所占的权重
    #[arg(long, default_value_t = 0.9)]
    momentum: f64,

    #[arg(long, default_value_t = 1e-5)]
    eps: f64,

    /// 平滑损失时当前批次所占的权重
    #[arg(long, default_value_t = 0.01)]
    smoothing: f64,

    #[arg(long, default_value_t = 100)]
    log_interval: usize,

    #[arg(long)]
    data_url: Option<String>,

    #[arg(long, default_value = "data/mnist")]
    data_dir: String,

    /// 训练曲线图片的保存路径
    #[arg(long, default_value = "target/output.png")]
    plot: PathBuf,

    #[arg(long, default_value_t = 0)]
    seed: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    tracing::debug!("{args:?}");

    // 设置随机种子以便结果可重现
    tch::manual_seed(args.seed);
    let device = Device::cuda_if_available();

    let dataset = MnistDataset::new(args.data_url.as_deref(), Some(args.data_dir.as_str()))
        .await
        .context("failed to load MNIST")?;

    let train_images = dataset.train_images.to_device(device);
    let train_labels = dataset.train_labels.to_device(device);
    let test_images = dataset.test_images.to_device(device);
    let test_labels = dataset.test_labels.to_device(device);

    let bn_config = BatchNormConfig {
        eps: args.eps,
        momentum: args.momentum,
    };
    let train_config = TrainConfig {
        batch_size: args.batch_size,
        learning_rate: args.learning_rate,
        smoothing_constant: args.smoothing,
        log_interval: args.log_interval,
    };

    let mut mlp = Mlp::new(
        IMAGE_SIZE * IMAGE_SIZE,
        args.hidden,
        NUM_CLASSES,
        args.weight_scale,
        bn_config,
        device,
    );

    let mut history: Vec<(EpochStats, f64)> = vec![];
    for epoch in 1..=args.epochs {
        // 平滑损失跨epoch延续
        let moving_loss = history.last().map(|(stats, _)| stats.moving_loss);
        let stats = train_epoch(
            &mut mlp,
            &train_images,
            &train_labels,
            epoch,
            moving_loss,
            train_config,
        )
        .with_context(|| format!("training epoch {epoch} failed"))?;

        // 每个epoch结束后在推理模式下计算准确率
        let train_acc = evaluate_accuracy(&mut mlp, &train_images, &train_labels, args.batch_size)?;
        let test_acc = evaluate_accuracy(&mut mlp, &test_images, &test_labels, args.batch_size)?;

        tracing::info!(
            "Epoch {}. Loss: {:.6}, Train_acc {:.4}, Test_acc {:.4}",
            epoch,
            stats.moving_loss,
            train_acc,
            test_acc
        );

        history.push((stats, test_acc));
    }

    plot::training_curves(&args.plot, &history)
        .map_err(|e| anyhow::anyhow!("failed to plot {}: {e}", args.plot.display()))?;
    tracing::info!("Saved training curves to {}", args.plot.display());

    Ok(())
}
