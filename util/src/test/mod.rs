pub use self::logger::init_logger;
