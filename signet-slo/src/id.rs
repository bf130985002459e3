use lazy_static::lazy_static;
use sonyflake::Sonyflake;

lazy_static! {
    static ref GENERATOR: Sonyflake =
        Sonyflake::new().expect("sonyflake generator init");
}

/// Mints a process-unique, time-ordered identifier (token ids and the like).
pub fn next_id() -> Result<u64, sonyflake::Error> {
    GENERATOR.next_id()
}
