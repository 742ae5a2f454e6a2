pub mod sqp;
pub mod trust_constr;
