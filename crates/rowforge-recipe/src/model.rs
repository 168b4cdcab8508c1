use std::collections::{BTreeMap, BTreeSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scope restricting random references to rows made in the current iteration.
pub const SCOPE_CURRENT_ITERATION: &str = "current-iteration";
/// Scope allowing random references to any row made so far.
pub const SCOPE_PRIOR_AND_CURRENT_ITERATIONS: &str = "prior-and-current-iterations";

/// Compiled recipe: ordered top-level statements plus declared options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Recipe {
    /// Options the recipe accepts from the caller.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<OptionDeclaration>,
    /// Statements executed in order on every iteration.
    pub statements: Vec<Statement>,
}

/// Declared recipe option with an optional default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OptionDeclaration {
    pub option: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// Top-level or friend statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Statement {
    /// Produce rows of a table.
    Object(ObjectTemplate),
    /// Bind a variable in the enclosing scope.
    Var(VariableDefinition),
}

/// Template producing `count` rows of `table` per execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ObjectTemplate {
    pub table: String,
    /// Alias other statements can refer to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    /// Number of rows per execution; defaults to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<FieldExpr>,
    /// Only execute on the first iteration of a run chain.
    #[serde(default, skip_serializing_if = "is_false")]
    pub just_once: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldDefinition>,
    /// Statements executed after each produced row.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub friends: Vec<Statement>,
    /// Source line, used to locate errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

/// Named field of an object template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FieldDefinition {
    pub name: String,
    pub value: FieldExpr,
}

/// Variable binding statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VariableDefinition {
    pub var: String,
    pub value: FieldExpr,
}

/// Expression evaluated to produce a field or variable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldExpr {
    /// Constant scalar.
    Literal { value: Value },
    /// Variable, field of the current row, object name, option or builtin.
    Var { name: String },
    /// Field of a row reached through another expression.
    Attr { base: Box<FieldExpr>, field: String },
    /// Row bound to a table name or nickname, possibly not yet created.
    Reference { to: String },
    /// Random earlier row of a table or nickname.
    RandomReference {
        to: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scope: Option<String>,
        #[serde(default, skip_serializing_if = "is_false")]
        unique: bool,
    },
    /// Nested template; evaluates to the last row it produced.
    Object(Box<ObjectTemplate>),
    /// Named value provider.
    Call {
        function: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<FieldExpr>,
    },
    /// String concatenation of the rendered parts.
    Concat { parts: Vec<FieldExpr> },
}

/// Stop once `count` rows of `table` exist in this run chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StoppingCriteria {
    pub table: String,
    pub count: u64,
}

impl StoppingCriteria {
    pub fn new(table: impl Into<String>, count: u64) -> Self {
        Self {
            table: table.into(),
            count,
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Recipe {
    pub fn new(statements: Vec<Statement>) -> Self {
        Self {
            options: Vec::new(),
            statements,
        }
    }

    pub fn with_option(mut self, option: impl Into<String>, default: Option<Value>) -> Self {
        self.options.push(OptionDeclaration {
            option: option.into(),
            default,
        });
        self
    }

    /// Every object template in the recipe, including friends and nested
    /// templates, in declaration order.
    pub fn templates(&self) -> Vec<&ObjectTemplate> {
        let mut templates = Vec::new();
        collect_statements(&self.statements, &mut templates);
        templates
    }

    /// Map of every referable name (table names and nicknames) to its table.
    pub fn name_slots(&self) -> BTreeMap<String, String> {
        let mut slots = BTreeMap::new();
        for template in self.templates() {
            slots.insert(template.table.clone(), template.table.clone());
            if let Some(nickname) = &template.nickname {
                slots.insert(nickname.clone(), template.table.clone());
            }
        }
        slots
    }

    /// Names of every table some template produces.
    pub fn tables(&self) -> BTreeSet<&str> {
        self.templates()
            .into_iter()
            .map(|template| template.table.as_str())
            .collect()
    }

    /// Union of the fields every template of a table declares, in first
    /// declaration order.
    pub fn table_fields(&self) -> BTreeMap<String, Vec<String>> {
        let mut tables: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for template in self.templates() {
            let fields = tables.entry(template.table.clone()).or_default();
            for field in &template.fields {
                if !fields.contains(&field.name) {
                    fields.push(field.name.clone());
                }
            }
        }
        tables
    }
}

fn collect_statements<'a>(statements: &'a [Statement], out: &mut Vec<&'a ObjectTemplate>) {
    for statement in statements {
        match statement {
            Statement::Object(template) => collect_template(template, out),
            Statement::Var(definition) => collect_expr(&definition.value, out),
        }
    }
}

fn collect_template<'a>(template: &'a ObjectTemplate, out: &mut Vec<&'a ObjectTemplate>) {
    out.push(template);
    if let Some(count) = &template.count {
        collect_expr(count, out);
    }
    for field in &template.fields {
        collect_expr(&field.value, out);
    }
    collect_statements(&template.friends, out);
}

fn collect_expr<'a>(expr: &'a FieldExpr, out: &mut Vec<&'a ObjectTemplate>) {
    match expr {
        FieldExpr::Object(template) => collect_template(template, out),
        FieldExpr::Attr { base, .. } => collect_expr(base, out),
        FieldExpr::Call { args, .. } => args.iter().for_each(|arg| collect_expr(arg, out)),
        FieldExpr::Concat { parts } => parts.iter().for_each(|part| collect_expr(part, out)),
        FieldExpr::Literal { .. }
        | FieldExpr::Var { .. }
        | FieldExpr::Reference { .. }
        | FieldExpr::RandomReference { .. } => {}
    }
}

impl ObjectTemplate {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            nickname: None,
            count: None,
            just_once: false,
            fields: Vec::new(),
            friends: Vec::new(),
            line: None,
        }
    }

    pub fn nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = Some(nickname.into());
        self
    }

    pub fn count(mut self, count: u64) -> Self {
        self.count = Some(FieldExpr::literal(count));
        self
    }

    pub fn count_expr(mut self, count: FieldExpr) -> Self {
        self.count = Some(count);
        self
    }

    pub fn just_once(mut self) -> Self {
        self.just_once = true;
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: FieldExpr) -> Self {
        self.fields.push(FieldDefinition {
            name: name.into(),
            value,
        });
        self
    }

    pub fn friend(mut self, statement: impl Into<Statement>) -> Self {
        self.friends.push(statement.into());
        self
    }

    pub fn line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    /// Whether rows of this template are kept out of the output streams.
    pub fn is_hidden(&self) -> bool {
        self.table.starts_with("__")
    }
}

impl From<ObjectTemplate> for Statement {
    fn from(template: ObjectTemplate) -> Self {
        Statement::Object(template)
    }
}

impl From<VariableDefinition> for Statement {
    fn from(definition: VariableDefinition) -> Self {
        Statement::Var(definition)
    }
}

impl Statement {
    pub fn var(name: impl Into<String>, value: FieldExpr) -> Self {
        Statement::Var(VariableDefinition {
            var: name.into(),
            value,
        })
    }
}

impl FieldExpr {
    pub fn literal(value: impl Into<Value>) -> Self {
        FieldExpr::Literal {
            value: value.into(),
        }
    }

    pub fn var(name: impl Into<String>) -> Self {
        FieldExpr::Var { name: name.into() }
    }

    pub fn attr(base: FieldExpr, field: impl Into<String>) -> Self {
        FieldExpr::Attr {
            base: Box::new(base),
            field: field.into(),
        }
    }

    pub fn reference(to: impl Into<String>) -> Self {
        FieldExpr::Reference { to: to.into() }
    }

    pub fn random_reference(to: impl Into<String>) -> Self {
        FieldExpr::RandomReference {
            to: to.into(),
            scope: None,
            unique: false,
        }
    }

    pub fn random_reference_in(to: impl Into<String>, scope: impl Into<String>) -> Self {
        FieldExpr::RandomReference {
            to: to.into(),
            scope: Some(scope.into()),
            unique: false,
        }
    }

    pub fn unique_random_reference(to: impl Into<String>) -> Self {
        FieldExpr::RandomReference {
            to: to.into(),
            scope: None,
            unique: true,
        }
    }

    pub fn object(template: ObjectTemplate) -> Self {
        FieldExpr::Object(Box::new(template))
    }

    pub fn call(function: impl Into<String>, args: Vec<FieldExpr>) -> Self {
        FieldExpr::Call {
            function: function.into(),
            args,
        }
    }

    pub fn concat(parts: Vec<FieldExpr>) -> Self {
        FieldExpr::Concat { parts }
    }
}
