pub(crate) use self::task_pool::TaskPool;

mod task_pool;
