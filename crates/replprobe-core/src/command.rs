//! The ordered list of commands fed to the child's stdin.

/// An immutable, ordered sequence of newline-terminated commands.
///
/// Insertion order is write order. The bytes of each command are written
/// exactly as stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSequence {
    commands: Vec<String>,
}

impl CommandSequence {
    /// Build a sequence from bare command lines, appending `\n` to any line
    /// that does not already end with one.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let commands = lines
            .into_iter()
            .map(|line| {
                let mut line = line.into();
                if !line.ends_with('\n') {
                    line.push('\n');
                }
                line
            })
            .collect();
        Self { commands }
    }

    /// Build a sequence that writes each string byte-for-byte, with no
    /// newline added.
    pub fn raw<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            commands: commands.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().map(String::as_str)
    }

    /// Default line extraction cap: one line of slack per run beyond the
    /// number of commands.
    pub fn default_line_cap(&self) -> usize {
        self.commands.len() + 1
    }

    /// The exact bytes the child will observe on stdin if every command is
    /// delivered.
    pub fn concatenated(&self) -> Vec<u8> {
        self.commands.iter().flat_map(|c| c.bytes()).collect()
    }
}
