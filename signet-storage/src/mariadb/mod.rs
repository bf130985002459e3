mod key;

pub use key::{KeyRepoImpl, MariadbLease};
