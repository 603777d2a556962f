//! Integration tests for the ingestion, training and serving pipeline

use std::io::Cursor;

use ndarray::Array2;
use tch::Device;
use tempfile::TempDir;

use vegetation_cgan::data::{write_block, BlockKind, Section, DEFAULT_RASTER_ROWS};
use vegetation_cgan::model::{DiscriminatorConfig, GeneratorConfig, Pix2PixConfig};
use vegetation_cgan::utils::Config;
use vegetation_cgan::{
    collect_training_instances, reshape_for_training, Error, GeneratorModel, InferenceServer,
    Pix2Pix, ProtocolError, ServeOutcome, StreamParser, Trainer, TrainingConfig,
};

/// One block with `rows` lines of `value` repeated `rows` times per section
fn uniform_section(rows: usize, value: &str) -> String {
    let line = vec![value; rows].join(" ");
    let mut out = String::new();
    for _ in 0..rows {
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// Generator small enough for 256x256 rasters in a test
fn tiny_generator() -> GeneratorConfig {
    GeneratorConfig {
        encoder_filters: vec![2, 2, 2, 2, 2],
        bottleneck_filters: 2,
        kernel_size: 4,
        ..GeneratorConfig::default()
    }
}

fn tiny_discriminator() -> DiscriminatorConfig {
    DiscriminatorConfig {
        filters: vec![2, 4],
        final_filters: 4,
        kernel_size: 4,
        ..DiscriminatorConfig::default()
    }
}

#[test]
fn test_zero_heights_one_plants_block() {
    let rows = DEFAULT_RASTER_ROWS;
    let input = format!(
        "begin_training_instance\nheights\n{}plants\n{}end_training_instance\nfinish\n",
        uniform_section(rows, "0.0"),
        uniform_section(rows, "1.0"),
    );
    let mut parser = StreamParser::new(Cursor::new(input.into_bytes()));

    let instances = collect_training_instances(&mut parser).unwrap();
    assert_eq!(instances.len(), 1);
    assert!(instances[0].heights().iter().all(|&v| v == 0.0));
    assert!(instances[0].plants().iter().all(|&v| v == 1.0));

    let dataset = reshape_for_training(&instances).unwrap();
    assert_eq!(dataset.inputs.shape(), &[1, rows, rows, 3]);
    assert!(dataset.inputs.iter().all(|&v| v == 0.0));
    assert!(dataset.targets.iter().all(|&v| v == 1.0));
}

#[test]
fn test_missing_end_sentinel_emits_nothing() {
    let rows = 4;
    let input = format!(
        "begin_training_instance\nheights\n{}plants\n{}finish\n",
        uniform_section(rows, "0.5"),
        uniform_section(rows, "0.5"),
    );
    let mut parser = StreamParser::with_rows(Cursor::new(input.into_bytes()), rows);

    let err = collect_training_instances(&mut parser).unwrap_err();
    assert!(matches!(
        err,
        Error::Protocol(ProtocolError::UnterminatedBlock { .. })
    ));
}

#[test]
fn test_missing_plants_is_assembly_error() {
    let rows = 2;
    let input = format!(
        "begin_training_instance\nheights\n{}end_training_instance\nfinish\n",
        uniform_section(rows, "0.5"),
    );
    let mut parser = StreamParser::with_rows(Cursor::new(input.into_bytes()), rows);

    let err = collect_training_instances(&mut parser).unwrap_err();
    assert!(matches!(err, Error::MissingSection { section: "plants", .. }));
}

#[test]
fn test_server_answers_full_size_request() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.model.generator = tiny_generator();
    config.serving.model_path = dir.path().join("g.ot").to_string_lossy().to_string();
    let model = GeneratorModel::new(tiny_generator(), Device::Cpu).unwrap();
    let server = InferenceServer::new(model, config);

    let rows = DEFAULT_RASTER_ROWS;
    let heights = Array2::from_shape_fn((rows, rows), |(r, c)| ((r + c) % 10) as f32 / 10.0);
    let mut request = Vec::new();
    write_block(&mut request, BlockKind::Inference, &[(Section::Heights, heights.view())]).unwrap();
    request.extend_from_slice(b"finish\n");

    let mut parser = StreamParser::new(Cursor::new(request));
    let mut output = Vec::new();
    let outcome = server.serve_once(&mut parser, &mut output).unwrap();
    assert_eq!(outcome, ServeOutcome::Served { trained: 0, inferred: 1 });

    let text = String::from_utf8(output).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "TreeProxMap");
    assert_eq!(text.matches("TreeProxMap").count(), 1);

    // two channel blocks, each 256 rows and a blank line
    let blocks: Vec<&[&str]> = lines[1..]
        .split(|l| l.is_empty())
        .filter(|b| !b.is_empty())
        .collect();
    assert_eq!(blocks.len(), 2);
    for block in blocks {
        assert_eq!(block.len(), rows);
        assert!(block.iter().all(|row| row.split(' ').count() == rows));
    }
}

#[test]
fn test_train_save_load_predict() {
    let dir = TempDir::new().unwrap();
    let rows = 32;
    let mut stream = Vec::new();
    for i in 0..4 {
        let heights = Array2::from_shape_fn((rows, rows), |(r, c)| ((r * c + i) % 5) as f32 / 5.0);
        let plants = heights.mapv(|v| 1.0 - v);
        write_block(
            &mut stream,
            BlockKind::Training,
            &[(Section::Heights, heights.view()), (Section::Plants, plants.view())],
        )
        .unwrap();
    }
    stream.extend_from_slice(b"finish\n");

    let mut parser = StreamParser::with_rows(Cursor::new(stream), rows);
    let dataset = reshape_for_training(&collect_training_instances(&mut parser).unwrap()).unwrap();

    let gen_config = GeneratorConfig {
        encoder_filters: vec![4, 8],
        bottleneck_filters: 8,
        kernel_size: 4,
        ..GeneratorConfig::default()
    };
    let generator = GeneratorModel::new(gen_config, Device::Cpu).unwrap();
    let mut model = Pix2Pix::new(
        generator,
        tiny_discriminator(),
        Pix2PixConfig::default(),
        (rows as i64, rows as i64),
    )
    .unwrap();
    assert_eq!(model.patch_shape(), (8, 8));

    let mut trainer = Trainer::new(TrainingConfig {
        epochs: 3,
        batch_size: 2,
        augment: false,
        progress: false,
        checkpoint_dir: dir.path().join("ckpt").to_string_lossy().to_string(),
        ..TrainingConfig::default()
    });
    let metrics = trainer.train(&mut model, &dataset).unwrap();
    assert_eq!(metrics.num_steps(), 6);
    assert!(metrics.steps.iter().all(|s| s.d_real >= 0.0 && s.d_fake >= 0.0 && s.is_finite()));

    let path = dir.path().join("model").join("generator.ot");
    model.into_generator().save(&path).unwrap();
    let loaded = GeneratorModel::load(&path, Device::Cpu).unwrap();
    let prediction = loaded.predict(&dataset.inputs).unwrap();
    assert_eq!(prediction.dim(), (4, rows, rows, 3));
    assert!(prediction.iter().all(|v| (-1.0..=1.0).contains(v)));
}

#[test]
fn test_load_missing_model_fails() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.serving.model_path = dir.path().join("nope.ot").to_string_lossy().to_string();

    let err = InferenceServer::load(config).err().unwrap();
    assert!(matches!(err, Error::ModelLoad { .. }));
}
