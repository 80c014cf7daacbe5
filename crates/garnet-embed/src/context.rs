//! Compile contexts

use garnet_engine::CompileOptions;

/// Settings applied when compiling source text, such as the file name
/// reported in syntax errors
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileContext {
    options: CompileOptions,
}

impl CompileContext {
    /// A context with no file name
    pub fn new() -> Self {
        Self::default()
    }

    /// A context reporting errors against `filename`
    pub fn with_filename(filename: impl Into<String>) -> Self {
        Self {
            options: CompileOptions::with_filename(filename),
        }
    }

    /// Set the file name
    pub fn set_filename(&mut self, filename: impl Into<String>) {
        self.options.filename = Some(filename.into());
    }

    /// The file name, if set
    pub fn filename(&self) -> Option<&str> {
        self.options.filename.as_deref()
    }

    pub(crate) fn options(&self) -> &CompileOptions {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename() {
        let mut cxt = CompileContext::new();
        assert_eq!(cxt.filename(), None);
        cxt.set_filename("init.rb");
        assert_eq!(cxt.filename(), Some("init.rb"));
        assert_eq!(cxt, CompileContext::with_filename("init.rb"));
    }
}
