//! The variable registry of a differential-algebraic model.
//!
//! A [`Dae`] holds the named state (`x`), algebraic (`z`), control (`u`) and parameter (`p`)
//! variables of a model plus its named output expressions. Variable names are unique across
//! all four categories and their insertion order fixes the layout of every buffer exchanged
//! with compiled code.
//!
//! The first time the layout is consumed (by building a category vector, the outputs
//! function or by exporting the model) the registry freezes, and from then on no variable
//! can be added to any category.
//!
//! # Example
//!
//! ```rust
//! use daexport::dae::Dae;
//!
//! let mut dae = Dae::new();
//! let pos = dae.add_x("pos").unwrap();
//! let vel = dae.add_x("vel").unwrap();
//! let force = dae.add_u("force").unwrap();
//! dae.add_output("energy", 0.5 * (&vel * &vel) + &pos * 0.0).unwrap();
//!
//! let x = dae.x_vec();
//! assert_eq!(x.len(), 2);
//! assert!(dae.add_p("mass").is_err());
//! # let _ = force;
//! ```

pub mod symbolic;

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DaeError;
pub use symbolic::{Expr, OutputsFunction, SymVector, Symbol, UnaryOp};

/// The four variable categories sharing one namespace
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableKind {
    /// Differential state
    State,
    Algebraic,
    Control,
    Parameter,
}

impl VariableKind {
    pub const ALL: [VariableKind; 4] = [
        VariableKind::State,
        VariableKind::Algebraic,
        VariableKind::Control,
        VariableKind::Parameter,
    ];

    fn index(self) -> usize {
        match self {
            VariableKind::State => 0,
            VariableKind::Algebraic => 1,
            VariableKind::Control => 2,
            VariableKind::Parameter => 3,
        }
    }

    fn vector_tag(self) -> &'static str {
        match self {
            VariableKind::State => "x_vec()",
            VariableKind::Algebraic => "z_vec()",
            VariableKind::Control => "u_vec()",
            VariableKind::Parameter => "p_vec()",
        }
    }
}

impl fmt::Display for VariableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VariableKind::State => "state",
            VariableKind::Algebraic => "algebraic",
            VariableKind::Control => "control",
            VariableKind::Parameter => "parameter",
        };
        f.write_str(s)
    }
}

/// Whether the variable layout may still change
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FreezeState {
    Open,
    /// Frozen for good; remembers which operations consumed the layout
    Frozen(BTreeSet<&'static str>),
}

#[derive(Clone, Debug, Default)]
struct Category {
    names: Vec<String>,
    symbols: HashMap<String, Expr>,
}

/// Variable registry of a DAE model
#[derive(Clone, Debug)]
pub struct Dae {
    categories: [Category; 4],
    output_names: Vec<String>,
    outputs: HashMap<String, Expr>,
    freeze: FreezeState,
}

impl Default for Dae {
    fn default() -> Self {
        Self::new()
    }
}

impl Dae {
    pub fn new() -> Self {
        Dae {
            categories: Default::default(),
            output_names: Vec::new(),
            outputs: HashMap::new(),
            freeze: FreezeState::Open,
        }
    }

    fn category(&self, kind: VariableKind) -> &Category {
        &self.categories[kind.index()]
    }

    pub fn freeze_state(&self) -> &FreezeState {
        &self.freeze
    }

    pub fn is_frozen(&self) -> bool {
        matches!(self.freeze, FreezeState::Frozen(_))
    }

    /// Marks the layout as consumed by `by`. Freezing is global and cannot be undone.
    pub fn freeze(&mut self, by: &'static str) {
        match self.freeze {
            FreezeState::Open => self.freeze = FreezeState::Frozen(BTreeSet::from([by])),
            FreezeState::Frozen(ref mut tags) => {
                tags.insert(by);
            }
        }
    }

    fn ensure_open(&self) -> Result<(), DaeError> {
        match &self.freeze {
            FreezeState::Open => Ok(()),
            FreezeState::Frozen(tags) => Err(DaeError::Frozen {
                by: tags.iter().map(|t| t.to_string()).collect(),
            }),
        }
    }

    /// The category a variable name belongs to, if it is declared
    pub fn kind_of(&self, name: &str) -> Option<VariableKind> {
        VariableKind::ALL
            .into_iter()
            .find(|kind| self.category(*kind).symbols.contains_key(name))
    }

    fn ensure_unique(&self, name: &str) -> Result<(), DaeError> {
        match self.kind_of(name) {
            Some(existing) => Err(DaeError::DuplicateName {
                name: name.to_string(),
                existing,
            }),
            None => Ok(()),
        }
    }

    fn insert(&mut self, kind: VariableKind, name: &str) -> Expr {
        let expr = Expr::Symbol(Symbol::new(name));
        let category = &mut self.categories[kind.index()];
        category.names.push(name.to_string());
        category.symbols.insert(name.to_string(), expr.clone());
        expr
    }

    /// Declares a new variable and returns its symbol
    pub fn add(&mut self, kind: VariableKind, name: &str) -> Result<Expr, DaeError> {
        self.ensure_open()?;
        self.ensure_unique(name)?;
        Ok(self.insert(kind, name))
    }

    /// Declares several variables at once, returning their symbols in input order.
    ///
    /// Either every name is added or, on error, none is.
    pub fn add_many<S: AsRef<str>>(
        &mut self,
        kind: VariableKind,
        names: &[S],
    ) -> Result<Vec<Expr>, DaeError> {
        self.ensure_open()?;
        for (i, name) in names.iter().enumerate() {
            let name = name.as_ref();
            self.ensure_unique(name)?;
            if names[..i].iter().any(|n| n.as_ref() == name) {
                return Err(DaeError::DuplicateName {
                    name: name.to_string(),
                    existing: kind,
                });
            }
        }
        Ok(names
            .iter()
            .map(|name| self.insert(kind, name.as_ref()))
            .collect())
    }

    /// Looks up the symbol of a declared variable
    pub fn get(&self, kind: VariableKind, name: &str) -> Result<Expr, DaeError> {
        self.category(kind)
            .symbols
            .get(name)
            .cloned()
            .ok_or_else(|| DaeError::UnknownName {
                name: name.to_string(),
                kind,
            })
    }

    pub fn get_many<S: AsRef<str>>(
        &self,
        kind: VariableKind,
        names: &[S],
    ) -> Result<Vec<Expr>, DaeError> {
        names.iter().map(|n| self.get(kind, n.as_ref())).collect()
    }

    /// Names of a category, in declaration order
    pub fn names(&self, kind: VariableKind) -> &[String] {
        &self.category(kind).names
    }

    /// Concatenates every variable of a category into one vector, freezing the registry
    pub fn vector(&mut self, kind: VariableKind) -> SymVector {
        self.freeze(kind.vector_tag());
        let category = self.category(kind);
        SymVector::new(
            category
                .names
                .iter()
                .map(|n| category.symbols[n].clone())
                .collect(),
        )
    }

    /// Records a named output expression.
    ///
    /// Outputs do not take part in any buffer layout, so they can still be added once the
    /// variables are frozen. An [`OutputsFunction`] only sees the outputs that existed when
    /// it was built.
    pub fn add_output(&mut self, name: &str, expr: impl Into<Expr>) -> Result<(), DaeError> {
        if self.outputs.contains_key(name) {
            return Err(DaeError::DuplicateOutputName(name.to_string()));
        }
        self.output_names.push(name.to_string());
        self.outputs.insert(name.to_string(), expr.into());
        Ok(())
    }

    pub fn output(&self, name: &str) -> Result<Expr, DaeError> {
        self.outputs
            .get(name)
            .cloned()
            .ok_or_else(|| DaeError::UnknownOutput(name.to_string()))
    }

    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    /// Builds the numeric map `(x, [u; p]) -> outputs`, freezing the registry
    pub fn outputs_function(&mut self) -> OutputsFunction {
        self.freeze("outputs_function()");
        let x = self.x_vec();
        let up = self.u_vec().concat(&self.p_vec());
        let outputs = self
            .output_names
            .iter()
            .map(|n| self.outputs[n].clone())
            .collect();
        OutputsFunction::new(&x, &up, self.output_names.clone(), outputs)
    }

    /// Variable counts `(nx, nz, nu, np)`
    pub fn counts(&self) -> (usize, usize, usize, usize) {
        (
            self.names(VariableKind::State).len(),
            self.names(VariableKind::Algebraic).len(),
            self.names(VariableKind::Control).len(),
            self.names(VariableKind::Parameter).len(),
        )
    }

    /// Snapshot of the variable ordering
    pub fn layout(&self) -> DaeLayout {
        DaeLayout {
            x: self.names(VariableKind::State).to_vec(),
            z: self.names(VariableKind::Algebraic).to_vec(),
            u: self.names(VariableKind::Control).to_vec(),
            p: self.names(VariableKind::Parameter).to_vec(),
        }
    }

    pub fn add_x(&mut self, name: &str) -> Result<Expr, DaeError> {
        self.add(VariableKind::State, name)
    }

    pub fn add_z(&mut self, name: &str) -> Result<Expr, DaeError> {
        self.add(VariableKind::Algebraic, name)
    }

    pub fn add_u(&mut self, name: &str) -> Result<Expr, DaeError> {
        self.add(VariableKind::Control, name)
    }

    pub fn add_p(&mut self, name: &str) -> Result<Expr, DaeError> {
        self.add(VariableKind::Parameter, name)
    }

    pub fn add_x_many<S: AsRef<str>>(&mut self, names: &[S]) -> Result<Vec<Expr>, DaeError> {
        self.add_many(VariableKind::State, names)
    }

    pub fn add_z_many<S: AsRef<str>>(&mut self, names: &[S]) -> Result<Vec<Expr>, DaeError> {
        self.add_many(VariableKind::Algebraic, names)
    }

    pub fn add_u_many<S: AsRef<str>>(&mut self, names: &[S]) -> Result<Vec<Expr>, DaeError> {
        self.add_many(VariableKind::Control, names)
    }

    pub fn add_p_many<S: AsRef<str>>(&mut self, names: &[S]) -> Result<Vec<Expr>, DaeError> {
        self.add_many(VariableKind::Parameter, names)
    }

    pub fn x(&self, name: &str) -> Result<Expr, DaeError> {
        self.get(VariableKind::State, name)
    }

    pub fn z(&self, name: &str) -> Result<Expr, DaeError> {
        self.get(VariableKind::Algebraic, name)
    }

    pub fn u(&self, name: &str) -> Result<Expr, DaeError> {
        self.get(VariableKind::Control, name)
    }

    pub fn p(&self, name: &str) -> Result<Expr, DaeError> {
        self.get(VariableKind::Parameter, name)
    }

    pub fn x_many<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Expr>, DaeError> {
        self.get_many(VariableKind::State, names)
    }

    pub fn z_many<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Expr>, DaeError> {
        self.get_many(VariableKind::Algebraic, names)
    }

    pub fn u_many<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Expr>, DaeError> {
        self.get_many(VariableKind::Control, names)
    }

    pub fn p_many<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Expr>, DaeError> {
        self.get_many(VariableKind::Parameter, names)
    }

    pub fn x_names(&self) -> &[String] {
        self.names(VariableKind::State)
    }

    pub fn z_names(&self) -> &[String] {
        self.names(VariableKind::Algebraic)
    }

    pub fn u_names(&self) -> &[String] {
        self.names(VariableKind::Control)
    }

    pub fn p_names(&self) -> &[String] {
        self.names(VariableKind::Parameter)
    }

    pub fn x_vec(&mut self) -> SymVector {
        self.vector(VariableKind::State)
    }

    pub fn z_vec(&mut self) -> SymVector {
        self.vector(VariableKind::Algebraic)
    }

    pub fn u_vec(&mut self) -> SymVector {
        self.vector(VariableKind::Control)
    }

    pub fn p_vec(&mut self) -> SymVector {
        self.vector(VariableKind::Parameter)
    }
}

/// Owned copy of a frozen model's variable ordering
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaeLayout {
    pub x: Vec<String>,
    pub z: Vec<String>,
    pub u: Vec<String>,
    pub p: Vec<String>,
}

impl DaeLayout {
    pub fn names(&self, kind: VariableKind) -> &[String] {
        match kind {
            VariableKind::State => &self.x,
            VariableKind::Algebraic => &self.z,
            VariableKind::Control => &self.u,
            VariableKind::Parameter => &self.p,
        }
    }

    pub fn nx(&self) -> usize {
        self.x.len()
    }

    pub fn nz(&self) -> usize {
        self.z.len()
    }

    pub fn nu(&self) -> usize {
        self.u.len()
    }

    pub fn np(&self) -> usize {
        self.p.len()
    }
}
