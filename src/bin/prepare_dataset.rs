use salescast::{
    init_logging, log_app_start, logging_config_from_env, pipeline_config_from_env,
    prepare_dataset,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start("prepare_dataset", &logging_cfg);

    let cfg = pipeline_config_from_env()?;
    let report = prepare_dataset(&cfg)?;

    println!(
        "Prepared dataset | rows={} selected={} holdout_r2={:.4} reduced={}",
        report.merge.rows,
        report.selected_features.join(","),
        report.selection.holdout_r2,
        cfg.paths.reduced.display()
    );

    Ok(())
}
