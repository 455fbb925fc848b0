use clap::Parser;
use tracing_subscriber::EnvFilter;

use replmat::{Config, Entry, HintPolicy, Machine, Matrix, hooks};

const PATTERN_A: [Entry; 8] = [
    (0, 1),
    (3, 1),
    (5, 1),
    (7, 1),
    (12, 1),
    (14, 1),
    (27, 1),
    (31, 1),
];
const PATTERN_B: [Entry; 7] = [(1, 1), (7, 1), (10, 1), (14, 1), (18, 1), (27, 1), (28, 1)];

const ROW_A: usize = 2;
const ROW_B: usize = 13;

#[derive(Parser, Debug)]
#[command(name = "replmat")]
#[command(about = "Build two row-distributed sparse matrices and report relocations")]
struct Cli {
    /// Number of memory partitions [env: REPLMAT_PARTITIONS]
    #[arg(short = 'p', long)]
    partitions: Option<usize>,

    /// Per-partition byte capacity, unlimited when unset [env: REPLMAT_PARTITION_BYTES]
    #[arg(long)]
    partition_bytes: Option<usize>,

    /// Placement hint policy: honor or ignore [env: REPLMAT_HINTS]
    #[arg(long)]
    hints: Option<HintPolicy>,

    /// Rows per matrix
    #[arg(short = 'n', long, default_value = "16")]
    rows: usize,

    /// Print every row of both matrices
    #[arg(short = 'v', long)]
    verbose: bool,
}

impl Cli {
    fn machine(&self) -> replmat::Result<Machine> {
        match (self.partitions, self.partition_bytes, self.hints) {
            (None, None, None) => Machine::from_env(),
            _ => Machine::new(&self.config()?),
        }
    }

    fn config(&self) -> replmat::Result<Config> {
        let mut config = Config::ambient()?;
        if let Some(partitions) = self.partitions {
            config.partitions = partitions;
        }
        if let Some(bytes) = self.partition_bytes {
            config = config.with_partition_bytes(bytes);
        }
        if let Some(hints) = self.hints {
            config = config.with_hints(hints);
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> replmat::Result<()> {
    let machine = cli.machine()?;
    let mut ctx = machine.context(0)?;

    let a = Matrix::create(&mut ctx, cli.rows)?;
    let b = Matrix::create(&mut ctx, cli.rows)?;

    let region = hooks::region_on(&machine, "matrix_build");
    a.populate(&mut ctx, ROW_A, &PATTERN_A)?;
    b.populate(&mut ctx, ROW_B, &PATTERN_B)?;
    let report = region.end();

    println!(
        "partitions={} rows={} rows_per_partition={} hints={:?}",
        a.partitions(),
        a.nrows(),
        a.rows_per_partition(),
        machine.hints()
    );
    let (home_a, home_b) = (a.address(&ctx, ROW_A)?, b.address(&ctx, ROW_B)?);
    println!(
        "A[{ROW_A}] on partition {} slot {}; B[{ROW_B}] on partition {} slot {}",
        home_a.partition(),
        home_a.slot(),
        home_b.partition(),
        home_b.slot()
    );
    println!("nnz: A={} B={}", a.nnz(&mut ctx)?, b.nnz(&mut ctx)?);

    if cli.verbose {
        for (name, m) in [("A", &a), ("B", &b)] {
            for i in 0..m.nrows() {
                println!("{name}[{i}] = {:?}", m.row(&mut ctx, i)?);
            }
        }
    }

    println!("{report}");
    if let Some(migrations) = &report.migrations {
        println!("migrations during {}:", report.name);
        print!("{migrations}");
    }
    println!("migrations total:");
    print!("{}", machine.migrations().snapshot());

    a.destroy();
    b.destroy();
    Ok(())
}
