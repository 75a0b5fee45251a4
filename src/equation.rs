use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;
use crate::srs::{speed_badge, SpeedBadge};

/// Submitted answer meaning the recognizer could not read what the learner wrote.
pub const NOT_RECOGNIZED: i32 = -1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Addition,
    Subtraction,
    Multiplication,
    Division,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Addition,
        Operation::Subtraction,
        Operation::Multiplication,
        Operation::Division,
    ];

    /// Token used inside fact ids and the attempt log.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Addition => "ADDITION",
            Operation::Subtraction => "SUBTRACTION",
            Operation::Multiplication => "MULTIPLICATION",
            Operation::Division => "DIVISION",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Operation::Addition => "+",
            Operation::Subtraction => "-",
            Operation::Multiplication => "×",
            Operation::Division => "÷",
        }
    }

    /// Strict parse of a fact id token.
    pub fn from_token(token: &str) -> Option<Self> {
        Operation::ALL.into_iter().find(|op| op.as_str() == token)
    }

    /// Lenient parse for user input.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "addition" | "add" | "plus" | "+" => Some(Operation::Addition),
            "subtraction" | "sub" | "minus" | "-" => Some(Operation::Subtraction),
            "multiplication" | "mul" | "times" | "x" | "*" | "×" => {
                Some(Operation::Multiplication)
            }
            "division" | "div" | "/" | "÷" => Some(Operation::Division),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one arithmetic fact, independent of how it is phrased.
///
/// Renders as `OPERATION_op1_op2`, e.g. `ADDITION_5_3`. Missing-operand
/// phrasings map onto the same id as their standard form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FactId {
    pub operation: Operation,
    pub op1: i32,
    pub op2: i32,
}

impl FactId {
    pub fn new(operation: Operation, op1: i32, op2: i32) -> Self {
        Self {
            operation,
            op1,
            op2,
        }
    }

    /// Standard-form equation for this fact.
    pub fn equation(&self) -> Equation {
        let (a, b) = (self.op1, self.op2);
        match self.operation {
            Operation::Addition => Equation::Addition { a, b },
            Operation::Subtraction => Equation::Subtraction { a, b },
            Operation::Multiplication => Equation::Multiplication { a, b },
            Operation::Division => Equation::Division { a, b },
        }
    }

    /// Missing-operand phrasing, for sums and differences only.
    pub fn inverse_equation(&self) -> Option<Equation> {
        let a = self.op1;
        match self.operation {
            Operation::Addition => Some(Equation::MissingAddend {
                a,
                result: a + self.op2,
            }),
            Operation::Subtraction => Some(Equation::MissingSubtrahend {
                a,
                result: a - self.op2,
            }),
            Operation::Multiplication | Operation::Division => None,
        }
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.operation, self.op1, self.op2)
    }
}

impl FromStr for FactId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = |reason| Error::MalformedFactId {
            id: s.to_string(),
            reason,
        };

        let parts: Vec<&str> = s.split('_').collect();
        if parts.len() != 3 {
            return Err(malformed("expected OPERATION_op1_op2"));
        }

        let operation = Operation::from_token(parts[0])
            .ok_or_else(|| Error::UnknownOperation(parts[0].to_string()))?;
        let op1 = parse_operand(parts[1])
            .ok_or_else(|| malformed("first operand is not a number"))?;
        let op2 = parse_operand(parts[2])
            .ok_or_else(|| malformed("second operand is not a number"))?;

        if op1 < 0 || op2 < 0 {
            return Err(malformed("operands must not be negative"));
        }
        if operation == Operation::Division && op2 == 0 {
            return Err(malformed("division by zero"));
        }
        let result = match operation {
            Operation::Addition => op1.checked_add(op2),
            Operation::Subtraction => op1.checked_sub(op2),
            Operation::Multiplication => op1.checked_mul(op2),
            Operation::Division => op1.checked_div(op2),
        };
        if result.is_none() {
            return Err(malformed("result out of range"));
        }

        Ok(FactId::new(operation, op1, op2))
    }
}

// Canonical decimal only, so an id always renders back to the same text.
fn parse_operand(text: &str) -> Option<i32> {
    let n: i32 = text.parse().ok()?;
    (n.to_string() == text).then_some(n)
}

impl Serialize for FactId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FactId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One concrete arithmetic problem as shown to the learner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Equation {
    Addition { a: i32, b: i32 },
    Subtraction { a: i32, b: i32 },
    Multiplication { a: i32, b: i32 },
    /// `a + ? = result`
    MissingAddend { a: i32, result: i32 },
    /// `a - ? = result`
    MissingSubtrahend { a: i32, result: i32 },
    Division { a: i32, b: i32 },
}

impl Equation {
    pub fn question(&self) -> String {
        let op = self.operation().symbol();
        match *self {
            Equation::Addition { a, b }
            | Equation::Subtraction { a, b }
            | Equation::Multiplication { a, b }
            | Equation::Division { a, b } => format!("{} {} {} = ?", a, op, b),
            Equation::MissingAddend { a, result } | Equation::MissingSubtrahend { a, result } => {
                format!("{} {} ? = {}", a, op, result)
            }
        }
    }

    pub fn expected_result(&self) -> i32 {
        match *self {
            Equation::Addition { a, b } => a + b,
            Equation::Subtraction { a, b } => a - b,
            Equation::Multiplication { a, b } => a * b,
            Equation::MissingAddend { a, result } => result - a,
            Equation::MissingSubtrahend { a, result } => a - result,
            // Levels never produce a zero divisor; FactId parsing rejects one.
            Equation::Division { a, b } => a.checked_div(b).unwrap_or(0),
        }
    }

    /// Question with `submitted` in place of `?`, using `≠` when it is wrong.
    pub fn solved_string(&self, submitted: i32) -> String {
        let sign = if submitted != NOT_RECOGNIZED && submitted == self.expected_result() {
            "="
        } else {
            "≠"
        };
        let op = self.operation().symbol();
        match *self {
            Equation::Addition { a, b }
            | Equation::Subtraction { a, b }
            | Equation::Multiplication { a, b }
            | Equation::Division { a, b } => format!("{} {} {} {} {}", a, op, b, sign, submitted),
            Equation::MissingAddend { a, result } | Equation::MissingSubtrahend { a, result } => {
                format!("{} {} {} {} {}", a, op, submitted, sign, result)
            }
        }
    }

    pub fn operation(&self) -> Operation {
        self.fact_id().operation
    }

    pub fn fact_id(&self) -> FactId {
        match *self {
            Equation::Addition { a, b } => FactId::new(Operation::Addition, a, b),
            Equation::Subtraction { a, b } => FactId::new(Operation::Subtraction, a, b),
            Equation::Multiplication { a, b } => FactId::new(Operation::Multiplication, a, b),
            Equation::MissingAddend { a, result } => {
                FactId::new(Operation::Addition, a, result - a)
            }
            Equation::MissingSubtrahend { a, result } => {
                FactId::new(Operation::Subtraction, a, a - result)
            }
            Equation::Division { a, b } => FactId::new(Operation::Division, a, b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    Unanswered,
    Correct,
    Incorrect,
    NotRecognized,
}

/// An equation presented in a session, with the learner's answer once given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exercise {
    pub equation: Equation,
    pub submitted: Option<i32>,
    pub solved: bool,
    pub elapsed_ms: Option<u64>,
    pub speed_badge: SpeedBadge,
}

impl Exercise {
    pub fn new(equation: Equation) -> Self {
        Self {
            equation,
            submitted: None,
            solved: false,
            elapsed_ms: None,
            speed_badge: SpeedBadge::None,
        }
    }

    /// Records an answer. An unrecognized answer is remembered but leaves the
    /// exercise unsolved.
    pub fn solve(&mut self, answer: i32, elapsed_ms: Option<u64>) -> bool {
        self.submitted = Some(answer);
        if answer == NOT_RECOGNIZED {
            return false;
        }
        self.solved = true;
        self.elapsed_ms = elapsed_ms;
        if let Some(ms) = elapsed_ms {
            self.speed_badge = speed_badge(self.fact_id(), ms);
        }
        self.correct()
    }

    pub fn correct(&self) -> bool {
        match self.submitted {
            Some(NOT_RECOGNIZED) | None => false,
            Some(answer) => self.solved && answer == self.equation.expected_result(),
        }
    }

    pub fn status(&self) -> AnswerStatus {
        match self.submitted {
            None => AnswerStatus::Unanswered,
            Some(NOT_RECOGNIZED) => AnswerStatus::NotRecognized,
            Some(_) if self.correct() => AnswerStatus::Correct,
            Some(_) => AnswerStatus::Incorrect,
        }
    }

    pub fn display_string(&self) -> String {
        match self.submitted {
            Some(answer) if self.solved => self.equation.solved_string(answer),
            _ => self.equation.question(),
        }
    }

    pub fn fact_id(&self) -> FactId {
        self.equation.fact_id()
    }
}
