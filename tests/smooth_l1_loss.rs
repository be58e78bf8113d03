use blob_layers::approx::approx_eq;
use blob_layers::backend::{set_backend, Backend};
use blob_layers::layers::{Layer, SmoothL1Loss, WeightMode};
use blob_layers::tensors::Blob;
use blob_layers::LayerError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn scalar_top() -> Vec<Blob<f64>> {
    vec![Blob::zeros(Vec::new())]
}

/// Runs setup and forward, returning the weighted loss.
fn run_forward(layer: &mut SmoothL1Loss<f64>, bottom: &[Blob<f64>], top: &mut [Blob<f64>]) -> f64 {
    layer.setup(bottom, top).unwrap();
    layer.forward(bottom, top).unwrap()
}

#[test]
fn test_single_element_outside_knee() {
    init_logging();
    let mut layer = SmoothL1Loss::new(1.0).unwrap();
    let mut bottom = vec![
        Blob::from_data(vec![1, 1, 1, 1], vec![5.0]),
        Blob::from_data(vec![1, 1, 1, 1], vec![0.0]),
    ];
    let mut top = scalar_top();

    let loss = run_forward(&mut layer, &bottom, &mut top);
    assert_eq!(loss, 4.5);
    assert_eq!(top[0].value.data, vec![4.5]);
    assert!(top[0].shape().is_empty());

    layer.backward(&top, &[true, true], &mut bottom).unwrap();
    assert_eq!(bottom[0].grad.data, vec![1.0]);
    assert_eq!(bottom[1].grad.data, vec![-1.0]);
}

#[test]
fn test_single_element_inside_knee() {
    let mut layer = SmoothL1Loss::new(1.0).unwrap();
    let mut bottom = vec![
        Blob::from_data(vec![1], vec![0.5]),
        Blob::from_data(vec![1], vec![0.0]),
    ];
    let mut top = scalar_top();

    assert_eq!(run_forward(&mut layer, &bottom, &mut top), 0.125);

    layer.backward(&top, &[true, false], &mut bottom).unwrap();
    assert_eq!(bottom[0].grad.data, vec![0.5]);
    assert_eq!(bottom[1].grad.data, vec![0.0]);
}

#[test]
fn test_branches_agree_at_knee() {
    for sigma in [0.5, 1.0, 2.0, 3.0] {
        let sigma2: f64 = sigma * sigma;
        let knee = 1.0 / sigma2;

        let mut layer = SmoothL1Loss::new(sigma).unwrap();
        let mut bottom = vec![
            Blob::from_data(vec![1, 2], vec![knee, -knee]),
            Blob::from_data(vec![1, 2], vec![0.0, 0.0]),
        ];
        let mut top = scalar_top();
        let loss = run_forward(&mut layer, &bottom, &mut top);

        // both elements sit on the knee where each branch gives 0.5 / sigma2
        assert!(approx_eq(&layer.errors().data[0], &(0.5 / sigma2)));
        assert!(approx_eq(&layer.errors().data[1], &(0.5 / sigma2)));
        assert!(approx_eq(&loss, &(1.0 / sigma2)));

        layer.backward(&top, &[true, false], &mut bottom).unwrap();
        assert_eq!(bottom[0].grad.data, vec![1.0, -1.0]);
    }
}

#[test]
fn test_gradient_sign_follows_prediction() {
    let mut layer = SmoothL1Loss::new(1.0).unwrap();
    let eps = 1e-3;
    let mut bottom = vec![
        Blob::from_data(vec![1, 3], vec![2.0 + eps, -2.0 + eps, 1.0 + eps]),
        Blob::from_data(vec![1, 3], vec![0.0, 0.0, 0.0]),
    ];
    let mut top = scalar_top();
    run_forward(&mut layer, &bottom, &mut top);
    layer.backward(&top, &[true, true], &mut bottom).unwrap();

    assert_eq!(bottom[0].grad.data, vec![1.0, -1.0, 1.0]);
    assert_eq!(bottom[1].grad.data, vec![-1.0, 1.0, -1.0]);
}

#[test]
fn test_zero_inside_weights_mask_everything() {
    let mut layer = SmoothL1Loss::new(1.0).unwrap();
    let mut bottom = vec![
        Blob::from_data(vec![2, 2], vec![10.0, -3.0, 0.2, 7.0]),
        Blob::from_data(vec![2, 2], vec![-1.0, 4.0, 0.0, 7.5]),
        Blob::from_data(vec![2, 2], vec![0.0; 4]),
        Blob::from_data(vec![2, 2], vec![3.0; 4]),
    ];
    let mut top = scalar_top();

    assert_eq!(run_forward(&mut layer, &bottom, &mut top), 0.0);
    assert_eq!(layer.weight_mode(), WeightMode::InsideOutside);

    layer.backward(&top, &[true, true, false, false], &mut bottom).unwrap();
    assert!(bottom[0].grad.data.iter().all(|&g| g == 0.0));
    assert!(bottom[1].grad.data.iter().all(|&g| g == 0.0));
}

#[test]
fn test_inside_weights_scale_difference_before_loss() {
    let mut layer = SmoothL1Loss::new(1.0).unwrap();
    let mut bottom = vec![
        Blob::from_data(vec![1, 2], vec![4.0, 4.0]),
        Blob::from_data(vec![1, 2], vec![0.0, 0.0]),
        Blob::from_data(vec![1, 2], vec![0.1, 1.0]),
    ];
    let mut top = scalar_top();
    let loss = run_forward(&mut layer, &bottom, &mut top);
    assert_eq!(layer.weight_mode(), WeightMode::Inside);

    // d = [0.4, 4.0]: quadratic then linear branch
    assert!(approx_eq(&loss, &(0.5 * 0.16 + 3.5)));

    layer.backward(&top, &[true, true, true], &mut bottom).unwrap();
    // derivative [0.4, 1.0] scaled by the inside weight again
    assert!(approx_eq(&bottom[0].grad.data[..], &[0.04, 1.0][..]));
    assert!(approx_eq(&bottom[1].grad.data[..], &[-0.04, -1.0][..]));
    // weight bottoms never receive a gradient
    assert_eq!(bottom[2].grad.data, vec![0.0, 0.0]);
}

#[test]
fn test_outside_weights_scale_loss_and_gradient() {
    let mut layer = SmoothL1Loss::new(1.0).unwrap();
    let mut bottom = vec![
        Blob::from_data(vec![1, 2], vec![3.0, 0.5]),
        Blob::from_data(vec![1, 2], vec![0.0, 0.0]),
        Blob::from_data(vec![1, 2], vec![1.0, 1.0]),
        Blob::from_data(vec![1, 2], vec![2.0, 0.5]),
    ];
    let mut top = scalar_top();
    let loss = run_forward(&mut layer, &bottom, &mut top);
    assert!(approx_eq(&loss, &(2.0 * 2.5 + 0.5 * 0.125)));

    layer.backward(&top, &[true, false, false, false], &mut bottom).unwrap();
    assert_eq!(bottom[0].grad.data, vec![2.0, 0.25]);
}

#[test]
fn test_loss_is_normalized_by_prediction_batch() {
    let mut layer = SmoothL1Loss::new(1.0).unwrap();
    let mut bottom = vec![
        Blob::from_data(vec![4, 1], vec![3.0, 3.0, 3.0, 3.0]),
        Blob::from_data(vec![4, 1], vec![0.0; 4]),
    ];
    let mut top = scalar_top();
    assert_eq!(run_forward(&mut layer, &bottom, &mut top), 2.5);

    layer.backward(&top, &[true, true], &mut bottom).unwrap();
    assert_eq!(bottom[0].grad.data, vec![0.25; 4]);
    assert_eq!(bottom[1].grad.data, vec![-0.25; 4]);
}

#[test]
fn test_target_with_larger_batch_uses_its_own_num() {
    let mut layer = SmoothL1Loss::new(1.0).unwrap();
    let mut bottom = vec![
        Blob::from_data(vec![1, 2], vec![2.0, -2.0]),
        Blob::from_data(vec![2, 2], vec![0.0, 0.0, 9.0, 9.0]),
    ];
    let mut top = scalar_top();

    // only the leading prediction-sized block of the target is read
    assert_eq!(run_forward(&mut layer, &bottom, &mut top), 3.0);

    layer.backward(&top, &[true, true], &mut bottom).unwrap();
    assert_eq!(bottom[0].grad.data, vec![1.0, -1.0]);
    assert_eq!(bottom[1].grad.data, vec![-0.5, 0.5, 0.0, 0.0]);
}

#[test]
fn test_loss_weight_scales_loss_and_gradient() {
    let mut layer = SmoothL1Loss::new(1.0).unwrap().with_loss_weight(2.0);
    let mut bottom = vec![
        Blob::from_data(vec![1], vec![5.0]),
        Blob::from_data(vec![1], vec![0.0]),
    ];
    let mut top = scalar_top();

    assert_eq!(run_forward(&mut layer, &bottom, &mut top), 9.0);
    assert_eq!(top[0].value.data, vec![4.5]);
    assert_eq!(top[0].grad.data, vec![2.0]);

    layer.backward(&top, &[true, true], &mut bottom).unwrap();
    assert_eq!(bottom[0].grad.data, vec![2.0]);
}

#[test]
fn test_backward_overwrites_and_is_repeatable() {
    let mut layer = SmoothL1Loss::new(1.0).unwrap();
    let mut bottom = vec![
        Blob::from_data(vec![1, 2], vec![0.5, 5.0]),
        Blob::from_data(vec![1, 2], vec![0.0, 0.0]),
    ];
    bottom[0].grad.data = vec![100.0, 100.0];
    let mut top = scalar_top();
    run_forward(&mut layer, &bottom, &mut top);

    layer.backward(&top, &[true, false], &mut bottom).unwrap();
    assert_eq!(bottom[0].grad.data, vec![0.5, 1.0]);

    layer.backward(&top, &[true, false], &mut bottom).unwrap();
    assert_eq!(bottom[0].grad.data, vec![0.5, 1.0]);
}

#[test]
fn test_skipped_propagation_leaves_gradient_untouched() {
    let mut layer = SmoothL1Loss::new(1.0).unwrap();
    let mut bottom = vec![
        Blob::from_data(vec![1], vec![5.0]),
        Blob::from_data(vec![1], vec![0.0]),
    ];
    bottom[1].grad.data = vec![7.0];
    let mut top = scalar_top();
    run_forward(&mut layer, &bottom, &mut top);

    layer.backward(&top, &[false, false], &mut bottom).unwrap();
    assert_eq!(bottom[0].grad.data, vec![0.0]);
    assert_eq!(bottom[1].grad.data, vec![7.0]);
}

#[test]
fn test_loss_is_never_negative() {
    let mut rng = StdRng::seed_from_u64(11);
    let shape = vec![3, 2, 2, 2];
    let count = 24;

    for sigma in [0.3, 1.0, 3.0] {
        let mut layer = SmoothL1Loss::new(sigma).unwrap();
        for _ in 0..20 {
            let mut sample = |lo: f64, hi: f64| -> Vec<f64> {
                (0..count).map(|_| rng.random_range(lo..hi)).collect()
            };
            let bottom = vec![
                Blob::from_data(shape.clone(), sample(-50.0, 50.0)),
                Blob::from_data(shape.clone(), sample(-50.0, 50.0)),
                Blob::from_data(shape.clone(), sample(-2.0, 2.0)),
                Blob::from_data(shape.clone(), sample(0.0, 4.0)),
            ];
            let mut top = scalar_top();
            let loss = run_forward(&mut layer, &bottom, &mut top);
            assert!(loss >= 0.0, "negative loss {loss} for sigma {sigma}");
        }
    }
}

#[test]
fn test_gradient_matches_finite_differences() {
    let mut rng = StdRng::seed_from_u64(3);
    let sigma: f64 = 1.5;
    let knee = 1.0 / (sigma * sigma);
    let shape = vec![2, 3, 1, 2];
    let count = 12;
    let h = 1e-6;

    let mut sample = |lo: f64, hi: f64| -> Vec<f64> {
        (0..count).map(|_| rng.random_range(lo..hi)).collect()
    };
    let prediction = sample(-2.0, 2.0);
    let target = sample(-2.0, 2.0);
    let inside = sample(0.5, 1.5);
    let outside = sample(0.0, 2.0);

    let blobs = |p: Vec<f64>| {
        vec![
            Blob::from_data(shape.clone(), p),
            Blob::from_data(shape.clone(), target.clone()),
            Blob::from_data(shape.clone(), inside.clone()),
            Blob::from_data(shape.clone(), outside.clone()),
        ]
    };

    let mut layer = SmoothL1Loss::new(sigma).unwrap();
    let mut top = scalar_top();
    let mut bottom = blobs(prediction.clone());
    run_forward(&mut layer, &bottom, &mut top);
    layer
        .backward(&top, &[true, true, false, false], &mut bottom)
        .unwrap();

    for j in 0..count {
        let d = inside[j] * (prediction[j] - target[j]);
        if (d.abs() - knee).abs() < 1e-4 {
            continue;
        }

        let mut plus = prediction.clone();
        plus[j] += h;
        let mut minus = prediction.clone();
        minus[j] -= h;

        let mut probe = SmoothL1Loss::new(sigma).unwrap();
        let loss_plus = run_forward(&mut probe, &blobs(plus), &mut scalar_top());
        let loss_minus = run_forward(&mut probe, &blobs(minus), &mut scalar_top());
        let numeric = (loss_plus - loss_minus) / (2.0 * h);

        let analytic = bottom[0].grad.data[j];
        assert!(
            (numeric - analytic).abs() < 1e-5,
            "element {j}: numeric {numeric} vs analytic {analytic}"
        );
        assert_eq!(bottom[1].grad.data[j], -analytic);
    }
}

#[test]
fn test_single_precision_matches_double() {
    let mut single = SmoothL1Loss::<f32>::new(1.0).unwrap();
    let bottom = vec![
        Blob::from_data(vec![2, 2], vec![0.25_f32, 1.5, -3.0, 0.0]),
        Blob::from_data(vec![2, 2], vec![0.0_f32, 0.0, 0.0, 0.5]),
    ];
    let mut top = vec![Blob::zeros(Vec::new())];
    single.setup(&bottom, &mut top).unwrap();
    let loss = single.forward(&bottom, &mut top).unwrap();

    let expected: f32 = (0.03125 + 1.0 + 2.5 + 0.125) / 2.0;
    assert!(approx_eq(&loss, &expected));
}

/// Restores the CPU backend when dropped, also on a failed assertion.
struct BackendGuard;

impl Drop for BackendGuard {
    fn drop(&mut self) {
        set_backend(Backend::Cpu);
    }
}

#[test]
fn test_gpu_backend_falls_back_to_cpu() {
    init_logging();
    // The backend is process-global, so tests running in parallel see this
    // switch too. Every kernel falls back to the CPU, so their results do not
    // depend on it.
    set_backend(Backend::Wgpu);
    let _guard = BackendGuard;

    let mut layer = SmoothL1Loss::new(1.0).unwrap();
    let bottom = vec![
        Blob::from_data(vec![1], vec![5.0]),
        Blob::from_data(vec![1], vec![0.0]),
    ];
    let mut top = scalar_top();
    assert_eq!(run_forward(&mut layer, &bottom, &mut top), 4.5);
}

#[test]
fn test_channel_mismatch_is_rejected() {
    let mut layer = SmoothL1Loss::new(1.0).unwrap();
    let bottom = vec![
        Blob::from_data(vec![1, 2, 1, 1], vec![1.0, 2.0]),
        Blob::from_data(vec![1, 1, 2, 1], vec![1.0, 2.0]),
    ];
    let mut top = scalar_top();

    let err = layer.setup(&bottom, &mut top).unwrap_err();
    assert!(matches!(
        err,
        LayerError::ShapeMismatch {
            index: 1,
            axis: "channels",
            expected: 2,
            actual: 1,
            ..
        }
    ));
    assert!(err.to_string().contains("channels of bottom[1]"));
}

#[test]
fn test_weight_shape_mismatch_is_rejected() {
    let mut layer = SmoothL1Loss::new(1.0).unwrap();
    let bottom = vec![
        Blob::from_data(vec![1, 1, 1, 2], vec![1.0, 2.0]),
        Blob::from_data(vec![1, 1, 1, 2], vec![1.0, 2.0]),
        Blob::from_data(vec![1, 1, 1, 2], vec![1.0, 1.0]),
        Blob::from_data(vec![1, 1, 2, 1], vec![1.0, 1.0]),
    ];
    let mut top = scalar_top();

    let err = layer.setup(&bottom, &mut top).unwrap_err();
    assert!(matches!(
        err,
        LayerError::ShapeMismatch {
            index: 3,
            axis: "height",
            ..
        }
    ));
}

#[test]
fn test_smaller_target_batch_is_rejected() {
    let mut layer = SmoothL1Loss::new(1.0).unwrap();
    let bottom = vec![
        Blob::from_data(vec![2, 1], vec![1.0, 2.0]),
        Blob::from_data(vec![1, 1], vec![1.0]),
    ];
    let mut top = scalar_top();

    let err = layer.setup(&bottom, &mut top).unwrap_err();
    assert!(matches!(err, LayerError::CountMismatch { expected: 2, actual: 1, .. }));
}

#[test]
fn test_blob_counts_are_enforced() {
    let mut layer = SmoothL1Loss::<f64>::new(1.0).unwrap();
    let one = vec![Blob::from_data(vec![1], vec![1.0])];
    let five: Vec<Blob<f64>> = (0..5).map(|_| Blob::from_data(vec![1], vec![1.0])).collect();

    let err = layer.setup(&one, &mut scalar_top()).unwrap_err();
    assert!(matches!(err, LayerError::BlobCount { role: "bottom", actual: 1, .. }));

    let err = layer.setup(&five, &mut scalar_top()).unwrap_err();
    assert!(matches!(err, LayerError::BlobCount { role: "bottom", actual: 5, .. }));

    let two = vec![one[0].clone(), one[0].clone()];
    let err = layer.setup(&two, &mut []).unwrap_err();
    assert!(matches!(err, LayerError::BlobCount { role: "top", actual: 0, .. }));
}

#[test]
fn test_configured_weight_mode_must_match_bottoms() {
    let mut layer = SmoothL1Loss::new(1.0)
        .unwrap()
        .with_weight_mode(WeightMode::InsideOutside);
    let bottom = vec![
        Blob::from_data(vec![1], vec![1.0]),
        Blob::from_data(vec![1], vec![1.0]),
        Blob::from_data(vec![1], vec![1.0]),
    ];
    let err = layer.setup(&bottom, &mut scalar_top()).unwrap_err();
    assert!(matches!(err, LayerError::InvalidParameter(_)));
}

#[test]
fn test_invalid_sigma_is_rejected() {
    assert!(SmoothL1Loss::<f64>::new(0.0).is_err());
    assert!(SmoothL1Loss::<f64>::new(-1.0).is_err());
    assert!(SmoothL1Loss::<f32>::new(f32::NAN).is_err());
    assert_eq!(SmoothL1Loss::<f64>::new(3.0).unwrap().sigma2(), 9.0);
}

#[test]
fn test_forward_requires_reshape_after_shape_change() {
    let mut layer = SmoothL1Loss::new(1.0).unwrap();
    let bottom = vec![
        Blob::from_data(vec![1], vec![1.0]),
        Blob::from_data(vec![1], vec![0.0]),
    ];
    let mut top = scalar_top();
    run_forward(&mut layer, &bottom, &mut top);

    let grown = vec![
        Blob::from_data(vec![1, 3], vec![1.0, 2.0, 3.0]),
        Blob::from_data(vec![1, 3], vec![0.0; 3]),
    ];
    let err = layer.forward(&grown, &mut top).unwrap_err();
    assert!(matches!(err, LayerError::NotReshaped { expected: 1, actual: 3, .. }));

    layer.reshape(&grown, &mut top).unwrap();
    assert_eq!(layer.forward(&grown, &mut top).unwrap(), 0.5 + 1.5 + 2.5);
}

#[test]
fn test_backward_before_forward_is_rejected() {
    let mut layer = SmoothL1Loss::new(1.0).unwrap();
    let mut bottom = vec![
        Blob::from_data(vec![1], vec![1.0]),
        Blob::from_data(vec![1], vec![0.0]),
    ];
    let mut top = scalar_top();
    layer.setup(&bottom, &mut top).unwrap();

    let err = layer.backward(&top, &[true, true], &mut bottom).unwrap_err();
    assert!(matches!(err, LayerError::BackwardBeforeForward { .. }));

    let err = layer.backward(&top, &[true], &mut bottom).unwrap_err();
    assert!(matches!(err, LayerError::BlobCount { role: "propagate_down flag", .. }));
}

#[test]
fn test_nan_propagates_without_error() {
    let mut layer = SmoothL1Loss::new(1.0).unwrap();
    let bottom = vec![
        Blob::from_data(vec![1, 2], vec![f64::NAN, 1.0]),
        Blob::from_data(vec![1, 2], vec![0.0, 0.0]),
    ];
    let mut top = scalar_top();
    assert!(run_forward(&mut layer, &bottom, &mut top).is_nan());
}

#[test]
fn test_reshape_with_same_shapes_keeps_forward_state() {
    let mut layer = SmoothL1Loss::new(1.0).unwrap();
    let mut bottom = vec![
        Blob::from_data(vec![1, 2], vec![5.0, 0.5]),
        Blob::from_data(vec![1, 2], vec![0.0, 0.0]),
    ];
    let mut top = scalar_top();
    run_forward(&mut layer, &bottom, &mut top);

    layer.reshape(&bottom, &mut top).unwrap();
    layer.backward(&top, &[true, true], &mut bottom).unwrap();
    assert_eq!(bottom[0].grad.data, vec![1.0, 0.5]);
    assert_eq!(bottom[1].grad.data, vec![-1.0, -0.5]);

    // a new shape discards it
    let grown = vec![
        Blob::from_data(vec![1, 3], vec![1.0, 2.0, 3.0]),
        Blob::from_data(vec![1, 3], vec![0.0; 3]),
    ];
    layer.reshape(&grown, &mut top).unwrap();
    let mut grown = grown;
    let err = layer.backward(&top, &[true, true], &mut grown).unwrap_err();
    assert!(matches!(err, LayerError::BackwardBeforeForward { .. }));
}

#[test]
fn test_short_gradient_leaves_other_gradients_untouched() {
    let mut layer = SmoothL1Loss::new(1.0).unwrap();
    let mut bottom = vec![
        Blob::from_data(vec![1, 2], vec![5.0, 5.0]),
        Blob::from_data(vec![1, 2], vec![0.0, 0.0]),
    ];
    let mut top = scalar_top();
    run_forward(&mut layer, &bottom, &mut top);
    bottom[1].grad.data.truncate(1);

    let err = layer.backward(&top, &[true, true], &mut bottom).unwrap_err();
    assert!(matches!(
        err,
        LayerError::CountMismatch {
            expected: 2,
            actual: 1,
            ..
        }
    ));
    assert_eq!(bottom[0].grad.data, vec![0.0, 0.0]);
    assert_eq!(bottom[1].grad.data, vec![0.0]);

    // the failed call did not disturb the forward state
    bottom[1].grad.data = vec![0.0, 0.0];
    layer.backward(&top, &[true, true], &mut bottom).unwrap();
    assert_eq!(bottom[0].grad.data, vec![1.0, 1.0]);
}

#[test]
fn test_every_bottom_allows_forced_backward() {
    let layer = SmoothL1Loss::<f64>::new(1.0).unwrap();
    assert!((0..4).all(|index| layer.allow_force_backward(index)));
}
