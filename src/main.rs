use std::env;
use std::io;
use std::process::ExitCode;
use std::time::Instant;

use vmtuning::text::{load_angles, load_response_matrix};
use vmtuning::{BatchDriver, DirectorySink, TuningPipeline};

fn run(args: &[String]) -> io::Result<()> {
    let responses_path = &args[1];
    let angles_path = &args[2];
    let out_dir = &args[3];
    let batch_size = match args.get(4) {
        Some(value) => value.parse::<usize>().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Invalid batch size {value:?}: {e}"),
            )
        })?,
        None => BatchDriver::default().batch_size,
    };

    let matrix = load_response_matrix(responses_path)?;
    let angles = load_angles(angles_path)?;
    println!(
        "Loaded {} neurons with {} trials each",
        matrix.n_neurons(),
        matrix.n_stim()
    );

    let mut sink = DirectorySink::new(out_dir)?;
    let driver = BatchDriver::new(TuningPipeline::default(), batch_size);
    let start = Instant::now();
    let summary = driver
        .run(&matrix, &angles, &mut sink)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    println!(
        "Wrote {} chunks ({} skipped) to {} in {} milliseconds",
        summary.chunks_written,
        summary.chunks_skipped,
        sink.directory().display(),
        start.elapsed().as_millis()
    );
    println!(
        "Fitted {} neurons, {} failed",
        summary.neurons_fitted, summary.neurons_failed
    );
    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    if args.len() < 4 || args.len() > 5 {
        println!("Usage: vmtuning <responses.tsv> <angles.txt> <out_dir> [batch_size]");
        return ExitCode::FAILURE;
    }
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            println!("Encountered error {err}");
            ExitCode::FAILURE
        }
    }
}
