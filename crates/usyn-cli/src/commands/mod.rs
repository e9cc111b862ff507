macro_rules! die {
    ($result:expr, $($arg:tt)*) => {
        $result.unwrap_or_else(|e| {
            eprintln!($($arg)*, e);
            std::process::exit(1);
        })
    };
}

pub mod cache_ops;
pub mod config_ops;
pub mod decode_ops;
pub mod import_ops;
pub mod stats_ops;
pub mod tune_ops;
