//! Well-known call targets recognized by the rewrite passes and loaders.

/// Free functions, identified by `(module path, name)`.
pub mod functional {
    use crate::graph::FunctionRef;

    pub const ELEMWISE_MODULE: &str = "functional.elemwise";
    pub const TENSOR_MODULE: &str = "functional.tensor";

    fn elemwise(name: &str) -> FunctionRef {
        FunctionRef::new(ELEMWISE_MODULE, name)
    }

    /// `add(x, y)`
    pub fn add() -> FunctionRef {
        elemwise("add")
    }

    /// `sub(x, y)` computes `x - y`.
    pub fn sub() -> FunctionRef {
        elemwise("sub")
    }

    pub fn mul() -> FunctionRef {
        elemwise("mul")
    }

    /// `div(x, y)` computes `x / y` with true division.
    pub fn div() -> FunctionRef {
        elemwise("div")
    }

    pub fn neg() -> FunctionRef {
        elemwise("neg")
    }

    /// `pow(x, y)`
    pub fn pow() -> FunctionRef {
        elemwise("pow")
    }

    pub fn ones() -> FunctionRef {
        FunctionRef::new(TENSOR_MODULE, "ones")
    }

    pub fn zeros() -> FunctionRef {
        FunctionRef::new(TENSOR_MODULE, "zeros")
    }

    /// Keyword names of the two operands of binary elementwise functions.
    pub const LHS: &str = "x";
    pub const RHS: &str = "y";
}

/// Tensor method names. Reflected spellings (`__r*__`) are invoked on the right-hand operand.
pub mod method {
    pub const ADD: &str = "__add__";
    pub const IADD: &str = "__iadd__";
    pub const RADD: &str = "__radd__";
    pub const SUB: &str = "__sub__";
    pub const ISUB: &str = "__isub__";
    pub const RSUB: &str = "__rsub__";
    pub const MUL: &str = "__mul__";
    pub const IMUL: &str = "__imul__";
    pub const RMUL: &str = "__rmul__";
    pub const TRUEDIV: &str = "__truediv__";
    pub const ITRUEDIV: &str = "__itruediv__";
    pub const RTRUEDIV: &str = "__rtruediv__";
    pub const NEG: &str = "__neg__";
    pub const POW: &str = "__pow__";
}
