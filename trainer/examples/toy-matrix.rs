use anyhow::Result;
use bnorm::{BatchNormConfig, RunningStats, batch_norm};
use tch::{Device, Kind, Tensor};

// 在一个 3x2 的小矩阵上检查批量归一化的结果。
// 每一列单独计算均值和方差，归一化后每列均值为0，方差为1。
fn main() -> Result<()> {
    let input = Tensor::from_slice(&[1.0_f32, 7., 5., 4., 6., 10.]).reshape([3, 2]);
    let gamma = Tensor::ones([2], (Kind::Float, Device::Cpu));
    let beta = Tensor::zeros([2], (Kind::Float, Device::Cpu));

    println!("input:");
    input.print();

    let mut stats = RunningStats::new();
    let output = batch_norm(
        &input,
        &gamma,
        &beta,
        &mut stats,
        "toy",
        BatchNormConfig::default(),
        true,
    )?;

    // 期望: [[-1.3887, 0.0], [0.4629, -1.2247], [0.9258, 1.2247]]
    println!("\n=======================\n");
    println!("output:");
    output.print();

    if let Some(running) = stats.get("toy") {
        println!("\nrunning mean:");
        running.mean.print();
        println!("running var:");
        running.var.print();
    }

    Ok(())
}
