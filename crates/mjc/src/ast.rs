//! Resolved, type-checked program tree.
//!
//! This is the hand-off point from an external front end. Every name has
//! already been resolved: references carry indices into [`Program::classes`]
//! (or a [`VarId`]/parameter position for locals) rather than identifiers.

use serde::{Deserialize, Serialize};

pub type ClassId = usize;

/// Identity of a local variable declaration within its routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VarId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub class: ClassId,
    pub field: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    pub class: ClassId,
    pub method: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub classes: Vec<ClassDecl>,
}

impl Program {
    #[must_use]
    pub fn class(&self, id: ClassId) -> Option<&ClassDecl> {
        self.classes.get(id)
    }

    #[must_use]
    pub fn field(&self, field: FieldRef) -> Option<&FieldDecl> {
        self.classes.get(field.class)?.fields.get(field.field)
    }

    #[must_use]
    pub fn method(&self, method: MethodRef) -> Option<&MethodDecl> {
        self.classes.get(method.class)?.methods.get(method.method)
    }

    /// `Class.method`, the name calls are resolved by.
    #[must_use]
    pub fn routine_name(&self, method: MethodRef) -> Option<String> {
        let class = self.classes.get(method.class)?;
        let decl = class.methods.get(method.method)?;
        Some(format!("{}.{}", class.name, decl.name))
    }

    /// Every routine in declaration order.
    pub fn methods(&self) -> impl Iterator<Item = (MethodRef, &MethodDecl)> {
        self.classes.iter().enumerate().flat_map(|(class, decl)| {
            decl.methods
                .iter()
                .enumerate()
                .map(move |(method, m)| (MethodRef { class, method }, m))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDecl {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
    #[serde(default)]
    pub methods: Vec<MethodDecl>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub ty: TypeDenoter,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_private: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDecl {
    pub name: String,
    pub return_type: TypeDenoter,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub params: Vec<ParameterDecl>,
    #[serde(default)]
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterDecl {
    pub name: String,
    pub ty: TypeDenoter,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarDecl {
    pub name: String,
    pub ty: TypeDenoter,
    pub id: VarId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeDenoter {
    Int,
    Boolean,
    Void,
    Class(String),
    Array(Box<TypeDenoter>),
    /// A type the language cannot name, such as `String` in the entry signature.
    Unsupported,
    Null,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statement {
    Block(Vec<Statement>),
    VarDecl {
        var: VarDecl,
        init: Expression,
    },
    Assign {
        target: Reference,
        value: Expression,
    },
    IndexedAssign {
        array: Reference,
        index: Expression,
        value: Expression,
    },
    Call {
        callee: Reference,
        #[serde(default)]
        args: Vec<Expression>,
    },
    Return(Option<Expression>),
    If {
        cond: Expression,
        then_branch: Box<Statement>,
        #[serde(default)]
        else_branch: Option<Box<Statement>>,
    },
    While {
        cond: Expression,
        body: Box<Statement>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expression {
    Literal(Literal),
    Ref(Reference),
    Index {
        array: Reference,
        index: Box<Expression>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Call {
        callee: Reference,
        #[serde(default)]
        args: Vec<Expression>,
    },
    NewObject {
        class: ClassId,
    },
    NewArray {
        element: TypeDenoter,
        size: Box<Expression>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Int(i32),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A resolved name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reference {
    This,
    Local(LocalRef),
    /// A field of the enclosing class, named without qualification.
    Field(FieldRef),
    /// A class name used as the base of a static access.
    Class(ClassId),
    /// A routine of the enclosing class, named without qualification.
    Method(MethodRef),
    /// The built-in `System.out.println`.
    Println,
    Qualified {
        base: Box<Reference>,
        member: Member,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalRef {
    /// Position in the routine's parameter list.
    Param(usize),
    Var(VarId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Member {
    Field(FieldRef),
    Method(MethodRef),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Program {
        Program {
            classes: vec![ClassDecl {
                name: "Counter".to_string(),
                fields: vec![FieldDecl {
                    name: "n".to_string(),
                    ty: TypeDenoter::Int,
                    is_static: false,
                    is_private: false,
                }],
                methods: vec![
                    MethodDecl {
                        name: "get".to_string(),
                        return_type: TypeDenoter::Int,
                        is_static: false,
                        is_private: false,
                        params: vec![],
                        body: vec![Statement::Return(Some(Expression::Ref(
                            Reference::Field(FieldRef { class: 0, field: 0 }),
                        )))],
                    },
                    MethodDecl {
                        name: "main".to_string(),
                        return_type: TypeDenoter::Void,
                        is_static: true,
                        is_private: false,
                        params: vec![ParameterDecl {
                            name: "args".to_string(),
                            ty: TypeDenoter::Array(Box::new(TypeDenoter::Class(
                                "String".to_string(),
                            ))),
                        }],
                        body: vec![],
                    },
                ],
            }],
        }
    }

    #[test]
    fn test_lookups() {
        let program = sample();
        let get = MethodRef {
            class: 0,
            method: 0,
        };
        assert_eq!(program.routine_name(get).as_deref(), Some("Counter.get"));
        assert_eq!(
            program.field(FieldRef { class: 0, field: 0 }).map(|f| f.name.as_str()),
            Some("n")
        );
        assert!(program.method(MethodRef { class: 1, method: 0 }).is_none());
        let names: Vec<_> = program.methods().map(|(_, m)| m.name.as_str()).collect();
        assert_eq!(names, vec!["get", "main"]);
    }

    #[test]
    fn test_json_roundtrip() {
        let program = sample();
        let json = serde_json::to_string(&program).unwrap();
        let back: Program = serde_json::from_str(&json).unwrap();
        assert_eq!(back, program);
    }

    #[test]
    fn test_json_defaults() {
        let json = r#"{"classes":[{"name":"Empty"}]}"#;
        let program: Program = serde_json::from_str(json).unwrap();
        assert!(program.classes[0].fields.is_empty());
        assert!(program.classes[0].methods.is_empty());
    }
}
