use salescast::{
    init_logging, log_app_start, logging_config_from_env, pipeline_config_from_env,
    run_comparison,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start("compare_models", &logging_cfg);

    let cfg = pipeline_config_from_env()?;
    let results = run_comparison(&cfg)?;

    println!(
        "{:<28} {:>14} {:>14} {:>8} {:>10}",
        "Model", "RMSE", "MAE", "R2", "TrainRows"
    );
    for row in &results {
        println!(
            "{:<28} {:>14.2} {:>14.2} {:>8.4} {:>10}",
            row.model, row.rmse, row.mae, row.r2, row.train_rows
        );
    }
    println!("Leaderboard written to {}", cfg.paths.leaderboard.display());

    Ok(())
}
