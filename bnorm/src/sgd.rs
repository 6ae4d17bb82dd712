use tch::Tensor;

/// 随机梯度下降: `param -= lr * grad`，更新后清空梯度。
/// 没有梯度的参数保持不变。
pub fn sgd(params: &mut [&mut Tensor], lr: f64) {
    tch::no_grad(|| {
        for param in params.iter_mut() {
            let grad = param.grad();
            if !grad.defined() {
                continue;
            }

            **param -= grad * lr;
            param.zero_grad();
        }
    });
}
