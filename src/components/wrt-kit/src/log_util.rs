use crate::get_wrt_log_dir;
use simplelog::*;
use std::fs::File;

// log level comes from env WRT_LOG, default is info
pub fn init_logging(service_name: &str, is_service: bool) {
    let log_level = std::env::var("WRT_LOG").unwrap_or_else(|_| "info".to_string());
    let log_level = log_level.parse().unwrap_or(log::LevelFilter::Info);

    let config = ConfigBuilder::new()
        .set_time_format_custom(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
        ))
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        log_level,
        config.clone(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];

    let log_file = get_wrt_log_dir(service_name, is_service).join(format!("{}.log", service_name));
    let file = log_file
        .parent()
        .map(std::fs::create_dir_all)
        .transpose()
        .ok()
        .and_then(|_| File::create(&log_file).ok());
    match file {
        Some(file) => loggers.push(WriteLogger::new(LevelFilter::Info, config, file)),
        None => eprintln!("create log file {} failed, log to terminal only", log_file.display()),
    }

    if CombinedLogger::init(loggers).is_err() {
        eprintln!("logger already initialized");
    }
}
