use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use lenet::data::mnist::{self, Split};
use lenet::train::{Checkpoint, DataStreamMonitoring, FinishAfter, Printing, Timing, TrainingDataMonitoring};
use lenet::{DataStream, GradientDescent, Hyperparameters, IterationScheme, LeNet, LeNetConfig, MainLoop};

/// Train a LeNet convolutional network on MNIST.
#[derive(Parser, Debug)]
#[command(name = "lenet", version, about)]
struct Cli {
    /// Destination of the JSON checkpoint
    #[arg(default_value = "mnist.json")]
    save_to: PathBuf,

    /// Number of training epochs (overrides the hyperparameters file)
    #[arg(long)]
    num_epochs: Option<usize>,

    /// Directory holding the uncompressed MNIST IDX files
    #[arg(long, default_value = "data/mnist")]
    data_dir: PathBuf,

    /// JSON file with training hyperparameters
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of feature maps of each convolutional stage
    #[arg(long, value_delimiter = ',', default_value = "6,16")]
    feature_maps: Vec<usize>,

    /// Widths of the hidden fully-connected layers
    #[arg(long, value_delimiter = ',', default_value = "120,84")]
    mlp_hiddens: Vec<usize>,

    /// Square filter size of each convolutional stage
    #[arg(long, value_delimiter = ',', default_value = "5,5")]
    conv_sizes: Vec<usize>,

    /// Square pooling size of each convolutional stage
    #[arg(long, value_delimiter = ',', default_value = "2,2")]
    pool_sizes: Vec<usize>,
}

impl Cli {
    fn hyperparameters(&self) -> Result<Hyperparameters> {
        let mut hp = match &self.config {
            Some(path) => Hyperparameters::load(path)
                .with_context(|| format!("failed to load hyperparameters from {}", path.display()))?,
            None => Hyperparameters::default(),
        };
        if let Some(num_epochs) = self.num_epochs {
            hp.num_epochs = num_epochs;
        }
        hp.validate()?;
        Ok(hp)
    }

    fn run(self) -> Result<()> {
        let hp = self.hyperparameters()?;
        let config = LeNetConfig::mnist(
            self.feature_maps.clone(),
            self.mlp_hiddens.clone(),
            self.conv_sizes.clone(),
            self.pool_sizes.clone(),
        );

        let mut model = LeNet::new(config).context("invalid network configuration")?;
        model.resolve_shapes().context("shape propagation failed")?;
        let conv_output = model.conv_output_shape().map(|s| s.to_string()).unwrap_or_default();
        info!(conv_output = %conv_output, head = ?model.head_dims(), "network shapes");
        model.initialize_parameters(&hp.parameter_init(), &mut StdRng::seed_from_u64(hp.seed))?;

        let train = mnist::load(&self.data_dir, Split::Train)
            .with_context(|| format!("failed to load MNIST from {}", self.data_dir.display()))?;
        let test = mnist::load(&self.data_dir, Split::Test)?;

        let train_scheme = if hp.shuffle {
            IterationScheme::Shuffled {
                batch_size: hp.batch_size,
                seed: hp.seed,
            }
        } else {
            IterationScheme::Sequential { batch_size: hp.batch_size }
        };
        let test_stream = DataStream::new(test, IterationScheme::Sequential { batch_size: hp.batch_size });

        let mut main_loop = MainLoop::new(model, GradientDescent::new(hp.learning_rate), DataStream::new(train, train_scheme))
            .with_extension(Timing::new())
            .with_extension(FinishAfter::epochs(hp.num_epochs))
            .with_extension(DataStreamMonitoring::new(test_stream, "test"))
            .with_extension(TrainingDataMonitoring::new("train"))
            .with_extension(Checkpoint::new(&self.save_to))
            .with_extension(Printing::new());

        main_loop.run()?;
        info!(save_to = %self.save_to.display(), "done");
        Ok(())
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("lenet=info".parse()?))
        .init();

    Cli::parse().run()
}
