use log::{Level, LevelFilter, Record};

pub struct LoggingConfig {
    level: LevelFilter,
    log_file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            log_file_path: None,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }

    pub fn output_to_file(mut self, path: impl Into<String>) -> Self {
        self.log_file_path = Some(path.into());
        self
    }

    pub fn apply(self) -> Result<(), fern::InitError> {
        use fern::colors::{Color, ColoredLevelConfig};

        let colors_line = ColoredLevelConfig::new()
          .error(Color::Red)
          .warn(Color::Yellow)
          .info(Color::White) // Default
          .debug(Color::BrightMagenta) // Default
          .trace(Color::BrightBlack);
        let colors_level = colors_line.info(Color::Green);

        let stderr_config = fern::Dispatch::new()
          .format(move |out, message, record| {
            out.finish(format_args!(
              "{begin_color_line}{date} {colored_level}{begin_color_line} [{target}]{file_line} {message}\x1B[0m",
              begin_color_line = format_args!(
                "\x1B[{}m",
                colors_line.get_color(&record.level()).to_fg_str()
              ),
              date = chrono::Local::now().format("[%Y/%m/%d %H:%M:%S]"),
              colored_level = colors_level.color(record.level()),
              target = record.target(),
              file_line = file_line(record),
            ));
          })
          .chain(std::io::stderr());

        let mut config = fern::Dispatch::new()
          .level(self.level)
          .chain(stderr_config);

        if let Some(log_file_path) = &self.log_file_path {
          let log_file_config = fern::Dispatch::new()
            .format(|out, message, record| {
              out.finish(format_args!(
                "{date} {level} [{target}]{file_line} {message}",
                date = chrono::Local::now().format("[%Y/%m/%d %H:%M:%S]"),
                level = record.level(),
                target = record.target(),
                file_line = file_line(record),
              ));
            })
            .chain(fern::log_file(log_file_path)?);

          config = config
              .chain(log_file_config);
        }

        config.apply()?;
        Ok(())
    }
}

/// Source location, for the levels where it helps.
fn file_line(record: &Record) -> String {
    match record.level() {
        Level::Error | Level::Warn | Level::Debug => {
            format!(
                " [{file}:{line}]",
                file = record.file().unwrap_or("N/A"),
                line = record.line().unwrap_or(0)
            )
        },
        _ => Default::default(),
    }
}
