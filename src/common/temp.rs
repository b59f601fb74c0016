use std::{collections::HashMap, fmt::Display};

/// A virtual register. Machine registers are virtual registers too; the
/// target precolors them before allocation.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy, Hash)]
pub struct Temp {
    num: u32,
}

impl Temp {
    pub fn num(self) -> u32 {
        self.num
    }

    #[cfg(test)]
    pub fn new_with(num: u32) -> Self {
        Temp { num }
    }
}

impl Display for Temp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.num)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Label {
    // unique identifier.
    Num(u32),
    // function that has unique identifier.
    Fn(u32, String),
    // use name directly, e.g. `main` or runtime functions.
    NamedFn(String),
}

impl Label {
    pub fn with_num(num: u32) -> Self {
        Self::Num(num)
    }

    pub fn with_named_fn(name: impl Into<String>) -> Self {
        Self::NamedFn(name.into())
    }
}

impl Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Label::Num(n) => write!(f, ".L{}", n),
            Label::Fn(n, s) => write!(f, "{}_{}", s, n),
            Label::NamedFn(s) => write!(f, "{}", s),
        }
    }
}

/// Owns every counter and name table of one compilation.
///
/// Registers and labels are numbered from the same context for the whole
/// program, so no two functions ever share an identifier.
#[derive(Debug, Default)]
pub struct Context {
    next_temp: u32,
    next_label: u32,
    names: HashMap<Temp, String>,
    blobs: Vec<(Label, Vec<u8>)>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_temp(&mut self) -> Temp {
        let temp = Temp {
            num: self.next_temp,
        };
        self.next_temp += 1;
        temp
    }

    pub fn named_temp(&mut self, name: impl Into<String>) -> Temp {
        let temp = self.new_temp();
        self.names.insert(temp, name.into());
        temp
    }

    pub fn new_label(&mut self) -> Label {
        let label = Label::Num(self.next_label);
        self.next_label += 1;
        label
    }

    pub fn fn_label(&mut self, name: impl Into<String>) -> Label {
        let label = Label::Fn(self.next_label, name.into());
        self.next_label += 1;
        label
    }

    pub fn temp_name(&self, temp: Temp) -> String {
        match self.names.get(&temp) {
            Some(name) => name.clone(),
            None => temp.to_string(),
        }
    }

    /// Registers read-only data and returns the label it is emitted under.
    pub fn add_blob(&mut self, bytes: impl Into<Vec<u8>>) -> Label {
        let label = self.new_label();
        self.blobs.push((label.clone(), bytes.into()));
        label
    }

    pub fn blobs(&self) -> &[(Label, Vec<u8>)] {
        &self.blobs
    }
}
