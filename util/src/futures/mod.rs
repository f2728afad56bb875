pub use self::join_task::JoinTask;

mod join_task;
