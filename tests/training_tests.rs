use approx::assert_abs_diff_eq;
use ndarray::Array4;
use rand::rngs::StdRng;
use rand::SeedableRng;

use lenet::train::{
    load_checkpoint, Checkpoint, DataStreamMonitoring, FinishAfter, Printing, Timing, TrainingDataMonitoring,
};
use lenet::{
    ActivationType, Batch, BorderMode, DataStream, Dataset, GradientDescent, Initializer, IterationScheme, LeNet,
    LeNetConfig, MainLoop, NetworkError, ParameterInit,
};

fn tiny_config() -> LeNetConfig {
    LeNetConfig {
        conv_activations: vec![ActivationType::ReLU],
        num_channels: 1,
        image_shape: (8, 8),
        filter_sizes: vec![(3, 3)],
        feature_maps: vec![4],
        pooling_sizes: vec![(2, 2)],
        top_mlp_activations: vec![ActivationType::ReLU, ActivationType::Softmax],
        top_mlp_dims: vec![12, 2],
        conv_step: (1, 1),
        border_mode: BorderMode::Valid,
    }
}

fn tiny_model() -> LeNet {
    let mut model = LeNet::new(tiny_config()).unwrap();
    model.resolve_shapes().unwrap();
    let init = ParameterInit::new(Initializer::isotropic_gaussian(0.1), Initializer::Constant(0.0));
    model.initialize_parameters(&init, &mut StdRng::seed_from_u64(3)).unwrap();
    model
}

/// Bright left half for class 0, bright right half for class 1.
fn halves_dataset(n: usize) -> Dataset {
    let labels: Vec<u8> = (0..n).map(|i| (i % 2) as u8).collect();
    let images = Array4::from_shape_fn((n, 1, 8, 8), |(k, _, _, j)| {
        let bright = if labels[k] == 0 { j < 4 } else { j >= 4 };
        if bright {
            255.0
        } else {
            0.0
        }
    });
    Dataset::new(images, labels).unwrap()
}

#[test]
fn test_main_loop_stops_after_epochs() {
    let train = DataStream::new(halves_dataset(20), IterationScheme::Sequential { batch_size: 6 });
    let test = DataStream::new(halves_dataset(10), IterationScheme::Sequential { batch_size: 5 });

    let mut main_loop = MainLoop::new(tiny_model(), GradientDescent::new(0.1), train)
        .with_extension(Timing::new())
        .with_extension(FinishAfter::epochs(3))
        .with_extension(DataStreamMonitoring::new(test, "test"))
        .with_extension(TrainingDataMonitoring::new("train"))
        .with_extension(Printing::new());
    main_loop.run().unwrap();

    let log = main_loop.log();
    assert_eq!(log.status.epochs_done, 3);
    assert_eq!(log.status.iterations_done, 3 * 4);
    assert!(log.status.finish_requested);

    // record 0 holds the measurements taken before training
    assert_eq!(log.records.len(), 4);
    assert!(log.records[0].values.contains_key("test_cost"));
    assert!(!log.records[0].values.contains_key("train_cost"));

    let last = log.last_record().unwrap();
    for key in [
        "test_cost",
        "test_error_rate",
        "train_cost",
        "train_error_rate",
        "train_total_gradient_norm",
        "epoch_took",
        "total_took",
    ] {
        assert!(last.values.contains_key(key), "missing {key}");
    }
    let error_rate = last.values["test_error_rate"];
    assert!((0.0..=1.0).contains(&error_rate));
}

#[test]
fn test_finish_after_batches() {
    let train = DataStream::new(halves_dataset(20), IterationScheme::Sequential { batch_size: 4 });
    let mut main_loop = MainLoop::new(tiny_model(), GradientDescent::new(0.01), train)
        .with_extension(FinishAfter::batches(7))
        .with_extension(TrainingDataMonitoring::new("train"));
    main_loop.run().unwrap();

    // the second epoch is interrupted and never reaches its epoch hooks
    let log = main_loop.log();
    assert_eq!(log.status.iterations_done, 7);
    assert_eq!(log.status.epochs_done, 1);
    assert_eq!(log.records.len(), 1);
    assert_eq!(log.records[0].epochs_done, 1);
    assert_eq!(log.records[0].iterations_done, 5);
}

#[test]
fn test_empty_training_stream_rejected() {
    let empty = Dataset::new(Array4::zeros((0, 1, 8, 8)), Vec::new()).unwrap();
    let train = DataStream::new(empty, IterationScheme::Sequential { batch_size: 4 });
    let mut main_loop =
        MainLoop::new(tiny_model(), GradientDescent::new(0.01), train).with_extension(FinishAfter::batches(3));

    assert!(matches!(main_loop.run(), Err(NetworkError::InvalidData(_))));
    assert_eq!(main_loop.log().status.iterations_done, 0);
}

#[test]
fn test_out_of_range_target_is_an_error() {
    let mut model = tiny_model();
    let before = model.record();
    let batch = Batch {
        features: halves_dataset(1).images().clone(),
        targets: vec![5],
    };

    let result = GradientDescent::new(0.1).process_batch(&mut model, &batch);
    assert!(matches!(result, Err(NetworkError::InvalidData(_))));
    assert_eq!(model.record(), before);
}

#[test]
fn test_training_reduces_cost() {
    // alternating labels keep every batch balanced
    let train = DataStream::new(halves_dataset(40), IterationScheme::Sequential { batch_size: 8 });
    let test = DataStream::new(halves_dataset(20), IterationScheme::Sequential { batch_size: 10 });

    let mut main_loop = MainLoop::new(tiny_model(), GradientDescent::new(0.1), train)
        .with_extension(FinishAfter::epochs(10))
        .with_extension(DataStreamMonitoring::new(test, "test"));
    main_loop.run().unwrap();

    let records = &main_loop.log().records;
    let before = records[0].values["test_cost"];
    let after = records[records.len() - 1].values["test_cost"];
    assert!(after < before, "cost went from {before} to {after}");
}

#[test]
fn test_checkpoint_restores_model_and_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lenet.json");

    let train = DataStream::new(halves_dataset(12), IterationScheme::Sequential { batch_size: 4 });
    let mut main_loop = MainLoop::new(tiny_model(), GradientDescent::new(0.1), train)
        .with_extension(FinishAfter::epochs(2))
        .with_extension(TrainingDataMonitoring::new("train"))
        .with_extension(Checkpoint::new(&path));
    main_loop.run().unwrap();

    let record = load_checkpoint(&path).unwrap();
    assert_eq!(&record.config, main_loop.model().config());
    assert_eq!(record.log.status, main_loop.log().status);
    assert_eq!(record.log.records.len(), 2);
    assert_abs_diff_eq!(
        record.log.records[1].values["train_cost"],
        main_loop.log().records[1].values["train_cost"],
        epsilon = 1e-9
    );
    assert!(!dir.path().join("lenet.json.tmp").exists());

    let (mut restored, log) = record.into_model().unwrap();
    assert_eq!(log.status.epochs_done, 2);

    let mut trained = main_loop.into_model();
    let features = halves_dataset(4).images().clone();
    let expected = trained.apply(&features).unwrap();
    let actual = restored.apply(&features).unwrap();
    for (a, e) in actual.iter().zip(expected.iter()) {
        assert_abs_diff_eq!(*a, *e, epsilon = 1e-6);
    }
}

#[test]
fn test_missing_checkpoint_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load_checkpoint(dir.path().join("absent.json")).is_err());
}
