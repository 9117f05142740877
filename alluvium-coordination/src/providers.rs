pub(crate) mod etcd;
pub(crate) mod in_memory;
