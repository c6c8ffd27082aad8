pub mod commonservices;
pub mod fleet;
pub mod operandconfigs;
pub mod scopemapping;
