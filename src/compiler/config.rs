/// Host limits applied while compiling and running a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerConfiguration {
    /// Widest function import the host can bind.
    pub max_callable_parameters: usize,
    /// Parameters plus declared locals per function.
    pub max_function_locals: usize,
    pub max_call_depth: usize,
    pub max_data_segment_length: usize,
}

impl Default for CompilerConfiguration {
    fn default() -> Self {
        CompilerConfiguration {
            max_callable_parameters: 16,
            max_function_locals: 50_000,
            max_call_depth: 1024,
            max_data_segment_length: 16 * 1024 * 1024,
        }
    }
}

impl CompilerConfiguration {
    pub fn with_max_callable_parameters(mut self, max: usize) -> Self {
        self.max_callable_parameters = max;
        self
    }

    pub fn with_max_function_locals(mut self, max: usize) -> Self {
        self.max_function_locals = max;
        self
    }

    pub fn with_max_call_depth(mut self, max: usize) -> Self {
        self.max_call_depth = max;
        self
    }

    pub fn with_max_data_segment_length(mut self, max: usize) -> Self {
        self.max_data_segment_length = max;
        self
    }
}
