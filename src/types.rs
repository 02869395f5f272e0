/// Upper bound on the long edge of the rendition to download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum MaxSize {
    /// Highest rendition the API exposes, no cap.
    Original,
    #[value(name = "4k")]
    Px4096,
    #[value(name = "2048")]
    Px2048,
    #[value(name = "1600")]
    Px1600,
    #[value(name = "1024")]
    Px1024,
    #[value(name = "800")]
    Px800,
}

impl MaxSize {
    /// Long-edge cap in pixels, `None` for uncapped.
    pub fn max_edge(&self) -> Option<u32> {
        match self {
            MaxSize::Original => None,
            MaxSize::Px4096 => Some(4096),
            MaxSize::Px2048 => Some(2048),
            MaxSize::Px1600 => Some(1600),
            MaxSize::Px1024 => Some(1024),
            MaxSize::Px800 => Some(800),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_size_edges() {
        assert_eq!(MaxSize::Original.max_edge(), None);
        assert_eq!(MaxSize::Px4096.max_edge(), Some(4096));
        assert_eq!(MaxSize::Px800.max_edge(), Some(800));
    }

    #[test]
    fn test_max_size_value_names() {
        use clap::ValueEnum;
        let parsed = MaxSize::from_str("2048", true).unwrap();
        assert_eq!(parsed, MaxSize::Px2048);
        let parsed = MaxSize::from_str("4k", true).unwrap();
        assert_eq!(parsed, MaxSize::Px4096);
    }
}
