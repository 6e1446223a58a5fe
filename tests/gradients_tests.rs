use ndarray::{arr2, Array2, Axis};

use neuronika_layers::{check::GradientChecker, layers, *};

use rand::{rngs::StdRng, SeedableRng};

const SEED: u64 = 1701;

fn random_blob(shape: &[usize], filler: Filler, rng: &mut StdRng) -> Shared<Blob> {
    let mut blob = Blob::new(shape);
    filler.fill_using(&mut blob, rng).unwrap();
    new_shared(blob)
}

fn rows(blob: &Shared<Blob>) -> Array2<f32> {
    let blob = blob.borrow();
    let num = blob.num();
    let rows = blob
        .data()
        .clone()
        .into_shape((num, blob.count_from(1)))
        .unwrap();

    rows
}

fn squared_distance(rows: &Array2<f32>, lhs: usize, rhs: usize) -> f32 {
    let diff = &rows.row(lhs) - &rows.row(rhs);
    diff.dot(&diff)
}

#[test]
fn sigmoid() {
    let mut rng = StdRng::seed_from_u64(SEED);
    let bottom = [random_blob(
        &[4, 5],
        Filler::Uniform { min: -3., max: 3. },
        &mut rng,
    )];
    let top = [new_shared(Blob::default())];

    GradientChecker::new(1e-2, 1e-2)
        .check_gradient_exhaustive(&mut Sigmoid::new(), &bottom, &top, None)
        .unwrap();
}

#[test]
fn multilabel_loss() {
    let mut rng = StdRng::seed_from_u64(SEED);
    let bottom = [
        random_blob(&[5, 4], Filler::Gaussian { mean: 0., std: 2. }, &mut rng),
        random_blob(&[5, 4], Filler::Uniform { min: 0., max: 1. }, &mut rng),
    ];
    let top = [new_shared(Blob::default())];
    let mut layer = MultiLabelLoss::new(MultiLabelLossParameter::default()).unwrap();

    GradientChecker::new(1e-2, 1e-2)
        .check_gradient_exhaustive(&mut layer, &bottom, &top, Some(0))
        .unwrap();
}

#[test]
fn multilabel_loss_ignored_entries() {
    let mut rng = StdRng::seed_from_u64(SEED);
    let bottom = [
        random_blob(&[3, 4], Filler::Gaussian { mean: 0., std: 2. }, &mut rng),
        new_shared(Blob::from_ndarray(arr2(&[
            [1., 0., -1., 1.],
            [-1., -1., 0., 0.],
            [0., 1., 1., -1.],
        ]))),
    ];
    let top = [new_shared(Blob::default())];
    let mut layer = MultiLabelLoss::new(MultiLabelLossParameter {
        ignore_label: Some(-1),
    })
    .unwrap()
    .with_device(Device::Parallel);

    GradientChecker::new(1e-2, 1e-2)
        .check_gradient_exhaustive(&mut layer, &bottom, &top, Some(0))
        .unwrap();

    let gradient: Array2<f32> = bottom[0]
        .borrow()
        .diff()
        .clone()
        .into_dimensionality()
        .unwrap();
    assert_eq!(gradient[[0, 2]], 0.);
    assert_eq!(gradient[[2, 3]], 0.);
}

#[test]
fn multilabel_loss_large_scores() {
    let bottom = [
        new_shared(Blob::from_ndarray(arr2(&[[17., -20.], [25., -30.]]))),
        new_shared(Blob::from_ndarray(arr2(&[[0., 1.], [0.5, 0.5]]))),
    ];
    let top = [new_shared(Blob::default())];
    let mut layer = MultiLabelLoss::new(MultiLabelLossParameter::default()).unwrap();

    GradientChecker::new(1e-2, 1e-2)
        .check_gradient_exhaustive(&mut layer, &bottom, &top, Some(0))
        .unwrap();

    // 17 + 20 + 12.5 + 15 over two samples.
    let loss = layer.forward(&bottom, &top).unwrap();
    assert!((loss - 32.25).abs() < 1e-3);
}

#[test]
fn multilabel_loss_saturation() {
    let bottom = [
        new_shared(Blob::from_ndarray(arr2(&[[1e4, -1e4]]))),
        new_shared(Blob::from_ndarray(arr2(&[[0., 1.]]))),
    ];
    let top = [new_shared(Blob::default())];
    let mut layer = MultiLabelLoss::new(MultiLabelLossParameter::default()).unwrap();

    layer.setup(&bottom, &top).unwrap();
    let loss = layer.forward(&bottom, &top).unwrap();
    layer.backward(&top, &[true, false], &bottom).unwrap();

    assert!(loss.is_finite());
    assert!(bottom[0].borrow().diff().iter().all(|el| el.is_finite()));
}

#[test]
fn normalize() {
    let mut rng = StdRng::seed_from_u64(SEED);
    let bottom = [random_blob(
        &[3, 4, 2],
        Filler::Gaussian { mean: 0., std: 1. },
        &mut rng,
    )];
    let top = [new_shared(Blob::default())];
    let mut layer = Normalize::new(NormalizeParameter::default()).unwrap();

    GradientChecker::new(1e-3, 1e-2)
        .check_gradient_exhaustive(&mut layer, &bottom, &top, None)
        .unwrap();
}

#[test]
fn normalize_unit_norm() {
    let mut rng = StdRng::seed_from_u64(SEED);
    let bottom = [random_blob(
        &[6, 3, 2, 2],
        Filler::Uniform { min: -5., max: 5. },
        &mut rng,
    )];
    let top = [new_shared(Blob::default())];
    let mut layer = Normalize::new(NormalizeParameter::default())
        .unwrap()
        .with_device(Device::Parallel);

    layer.setup(&bottom, &top).unwrap();
    layer.forward(&bottom, &top).unwrap();

    let output = rows(&top[0]);
    assert_eq!(top[0].borrow().shape(), &[6, 3, 2, 2]);
    for row in output.axis_iter(Axis(0)) {
        assert!((row.dot(&row).sqrt() - 1.).abs() < 1e-5);
    }
}

#[test]
fn triplet_exp_loss() {
    let mut rng = StdRng::seed_from_u64(SEED);
    let filler = Filler::Uniform { min: -0.5, max: 0.5 };
    let margin = 1.;

    // Keeps every hinge clear of zero, where the loss has a kink.
    let bottom = loop {
        let bottom: Vec<_> = (0..3)
            .map(|_| random_blob(&[10, 5], filler, &mut rng))
            .collect();
        let (anchor, positive, negative) = (rows(&bottom[0]), rows(&bottom[1]), rows(&bottom[2]));
        let clear = (0..10).all(|idx| {
            let ap = &anchor.row(idx) - &positive.row(idx);
            let an = &anchor.row(idx) - &negative.row(idx);
            (margin + ap.dot(&ap) - an.dot(&an)).abs() > 0.1
        });
        if clear {
            break bottom;
        }
    };
    let top = [new_shared(Blob::default())];
    let mut layer = TripletExpLoss::new(TripletExpLossParameter { margin }).unwrap();

    GradientChecker::new(1e-2, 1e-2)
        .check_gradient_exhaustive(&mut layer, &bottom, &top, None)
        .unwrap();
}

#[test]
fn online_triplet_loss() {
    let mut rng = StdRng::seed_from_u64(SEED);
    let labels = [0., 0., 1., 1., 2., 2.];
    let margin = 1.;

    // Keeps every candidate hinge clear of zero, so that perturbations never change the mined
    // triplets.
    let embeddings = loop {
        let embeddings = random_blob(&[6, 4], Filler::Uniform { min: -1., max: 1. }, &mut rng);
        let points = rows(&embeddings);
        let mut clear = true;
        for anchor in 0..6 {
            for positive in (0..6).filter(|&idx| idx != anchor && labels[idx] == labels[anchor]) {
                for negative in (0..6).filter(|&idx| labels[idx] != labels[anchor]) {
                    let hinge = margin + squared_distance(&points, anchor, positive)
                        - squared_distance(&points, anchor, negative);
                    clear &= hinge.abs() > 0.1;
                }
            }
        }
        if clear {
            break embeddings;
        }
    };
    let bottom = [
        embeddings,
        new_shared(Blob::from_ndarray(
            Array2::from_shape_vec((6, 1), labels.to_vec()).unwrap(),
        )),
    ];
    let top = [new_shared(Blob::default())];
    let mut layer = OnlineTripletLoss::new(OnlineTripletLossParameter { margin, mu: 0.5 }).unwrap();

    GradientChecker::new(1e-3, 1e-2)
        .check_gradient_exhaustive(&mut layer, &bottom, &top, Some(0))
        .unwrap();
}

#[test]
fn online_triplet_loss_distinct_labels() {
    let bottom = [
        new_shared(Blob::from_ndarray(arr2(&[[0., 1.], [1., 0.], [1., 1.], [0., 0.]]))),
        new_shared(Blob::from_ndarray(arr2(&[[0.], [1.], [2.], [3.]]))),
    ];
    let top = [new_shared(Blob::default()), new_shared(Blob::default())];
    let mut layer = OnlineTripletLoss::new(OnlineTripletLossParameter::default()).unwrap();

    layer.setup(&bottom, &top).unwrap();
    assert_eq!(layer.forward(&bottom, &top).unwrap(), 0.);
    layer.backward(&top, &[true, false], &bottom).unwrap();

    assert_eq!(top[1].borrow().scalar(), 0.);
    assert!(bottom[0].borrow().diff().iter().all(|&el| el == 0.));
}

#[test]
fn label_inputs_reject_gradients() {
    let kinds = [
        LayerKind::MultiLabelLoss(MultiLabelLossParameter::default()),
        LayerKind::OnlineTripletLoss(OnlineTripletLossParameter::default()),
    ];

    for kind in kinds {
        let bottom = [
            new_shared(Blob::from_ndarray(arr2(&[[0., 1.], [1., 0.]]))),
            new_shared(Blob::from_ndarray(arr2(&[[0., 1.], [0., 1.]]))),
        ];
        let bottom = match kind {
            LayerKind::OnlineTripletLoss(_) => [
                bottom[0].clone(),
                new_shared(Blob::from_ndarray(arr2(&[[0.], [0.]]))),
            ],
            _ => bottom,
        };
        let top = [new_shared(Blob::default())];
        let mut layer = layers::create(&LayerParameter::new(kind)).unwrap();

        layer.setup(&bottom, &top).unwrap();
        layer.forward(&bottom, &top).unwrap();

        assert!(!layer.allow_force_backward(1));
        assert!(matches!(
            layer.backward(&top, &[true, true], &bottom),
            Err(LayerError::LabelGradient { index: 1, .. })
        ));
    }
}

#[test]
fn factory_layers_match_direct_ones() {
    let bottom = [
        new_shared(Blob::from_ndarray(arr2(&[[0., 0.], [1., 1.]]))),
        new_shared(Blob::from_ndarray(arr2(&[[1., 0.], [1., 0.5]]))),
        new_shared(Blob::from_ndarray(arr2(&[[0., 1.], [2., 1.]]))),
    ];
    let top = [new_shared(Blob::default())];

    let param = LayerParameter::new(LayerKind::TripletExpLoss(TripletExpLossParameter {
        margin: 0.5,
    }))
    .with_name("triplet")
    .with_device(Device::Parallel)
    .with_loss_weight(2.);
    let mut created = layers::create(&param).unwrap();
    created.setup(&bottom, &top).unwrap();
    let weighted = created.forward(&bottom, &top).unwrap();

    let mut direct = TripletExpLoss::new(TripletExpLossParameter { margin: 0.5 }).unwrap();
    direct.setup(&bottom, &top).unwrap();
    let loss = direct.forward(&bottom, &top).unwrap();

    assert!(loss > 0.);
    assert!((weighted - 2. * loss).abs() < 1e-5);
}

#[test]
fn blob_count_is_checked() {
    let bottom = [new_shared(Blob::new(&[2, 3]))];
    let top = [new_shared(Blob::default())];
    let mut layer = TripletExpLoss::new(TripletExpLossParameter::default()).unwrap();

    assert!(matches!(
        layer.setup(&bottom, &top),
        Err(LayerError::BlobCount {
            side: "bottom",
            got: 1,
            ..
        })
    ));
}

#[cfg(feature = "serialize")]
#[test]
fn parameters_from_json() {
    let param: LayerParameter =
        serde_json::from_str(r#"{"kind": {"type": "OnlineTripletLoss", "mu": 1.0}}"#).unwrap();

    assert_eq!(
        param,
        LayerParameter::new(LayerKind::OnlineTripletLoss(OnlineTripletLossParameter {
            margin: 1.,
            mu: 1.,
        }))
    );

    let param = LayerParameter::new(LayerKind::Sigmoid)
        .with_name("activation")
        .with_device(Device::Parallel);
    let json = serde_json::to_string(&param).unwrap();
    assert_eq!(serde_json::from_str::<LayerParameter>(&json).unwrap(), param);
}
