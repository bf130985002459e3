use lazy_static::lazy_static;
use regex::Regex;
use validator::ValidationError;

lazy_static! {
    static ref ORDER_BY: Regex =
        Regex::new(r"^\w+(\.\w+)?(\s+(ASC|DESC|asc|desc))?$").unwrap();
}

pub fn check_order_by(order_by: &str) -> Result<(), ValidationError> {
    if !ORDER_BY.is_match(order_by) {
        return Err(ValidationError::new("invalid order_by clause"));
    }
    Ok(())
}
