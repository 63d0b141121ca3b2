use salescast::{
    init_logging, log_app_start, logging_config_from_env, pipeline_config_from_env,
    train_best_model,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start("train_best_model", &logging_cfg);

    let cfg = pipeline_config_from_env()?;
    let report = train_best_model(&cfg)?;

    println!(
        "Trained {} | cv_best_score={:.4} test_rmse={:.2} test_r2={:.4} fingerprint={} artifact={}",
        report.model_name,
        report.best_score,
        report.test_rmse,
        report.test_r2,
        report.fingerprint,
        cfg.paths.artifact.display()
    );

    Ok(())
}
