//! Calculator tool — evaluates arithmetic expressions.
//!
//! Small recursive-descent evaluator over `+ - * / %` with parentheses
//! and unary minus. Numbers are f64 throughout.

use async_trait::async_trait;
use stepwise_core::{Tool, ToolError, ToolOutput, ToolParam};

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluates an arithmetic expression (+ - * / %, parentheses)"
    }

    fn parameters(&self) -> Vec<ToolParam> {
        vec![ToolParam::new("expression", "string")]
    }

    async fn invoke(&self, args: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let expr = args
            .get("expression")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ToolError::InvalidArguments("calculator requires an expression argument".into())
            })?;
        let value = evaluate(expr).map_err(|reason| ToolError::ExecutionFailed {
            tool_name: "calculator".into(),
            reason,
        })?;
        // Render integers without a trailing ".0".
        let text = if value.fract() == 0.0 && value.abs() < 1e15 {
            format!("{}", value as i64)
        } else {
            format!("{value}")
        };
        Ok(ToolOutput::text(text))
    }
}

fn evaluate(expr: &str) -> Result<f64, String> {
    let mut cursor = Cursor::new(expr);
    let value = cursor.expression()?;
    cursor.skip_ws();
    match cursor.peek() {
        None => Ok(value),
        Some(c) => Err(format!("unexpected character {c:?}")),
    }
}

struct Cursor<'a> {
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(expr: &'a str) -> Self {
        Self { rest: expr }
    }

    fn peek(&self) -> Option<char> {
        self.rest.chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.rest = &self.rest[c.len_utf8()..];
        Some(c)
    }

    fn skip_ws(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn expression(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some('+') => {
                    self.bump();
                    value += self.term()?;
                }
                Some('-') => {
                    self.bump();
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.factor()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some('*') => {
                    self.bump();
                    value *= self.factor()?;
                }
                Some('/') => {
                    self.bump();
                    let divisor = self.factor()?;
                    if divisor == 0.0 {
                        return Err("division by zero".into());
                    }
                    value /= divisor;
                }
                Some('%') => {
                    self.bump();
                    let divisor = self.factor()?;
                    if divisor == 0.0 {
                        return Err("modulo by zero".into());
                    }
                    value %= divisor;
                }
                _ => return Ok(value),
            }
        }
    }

    fn factor(&mut self) -> Result<f64, String> {
        self.skip_ws();
        match self.peek() {
            Some('-') => {
                self.bump();
                Ok(-self.factor()?)
            }
            Some('(') => {
                self.bump();
                let value = self.expression()?;
                self.skip_ws();
                if self.bump() != Some(')') {
                    return Err("missing closing parenthesis".into());
                }
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) => Err(format!("unexpected character {c:?}")),
            None => Err("unexpected end of expression".into()),
        }
    }

    fn number(&mut self) -> Result<f64, String> {
        let start = self.rest;
        let mut len = 0;
        let mut seen_dot = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => {}
                '.' if !seen_dot => seen_dot = true,
                _ => break,
            }
            len += 1;
            self.bump();
        }
        start[..len]
            .parse()
            .map_err(|_| format!("invalid number {:?}", &start[..len]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_arithmetic() {
        assert_eq!(evaluate("2 + 3 * 4").unwrap(), 14.0);
        assert_eq!(evaluate("(2 + 3) * 4").unwrap(), 20.0);
        assert_eq!(evaluate("10 / 4").unwrap(), 2.5);
        assert_eq!(evaluate("10 % 3").unwrap(), 1.0);
    }

    #[test]
    fn unary_minus_and_decimals() {
        assert_eq!(evaluate("-3.5 + 1").unwrap(), -2.5);
        assert_eq!(evaluate("--2").unwrap(), 2.0);
    }

    #[test]
    fn errors_are_descriptive() {
        assert!(evaluate("1 / 0").unwrap_err().contains("zero"));
        assert!(evaluate("(1 + 2").unwrap_err().contains("parenthesis"));
        assert!(evaluate("2 + x").unwrap_err().contains("unexpected"));
        assert!(evaluate("").unwrap_err().contains("end of expression"));
    }

    #[tokio::test]
    async fn tool_renders_integer_results_plainly() {
        let out = CalculatorTool
            .invoke(serde_json::json!({"expression": "6 * 7"}))
            .await
            .unwrap();
        assert_eq!(out.payload, serde_json::json!("42"));
    }

    #[tokio::test]
    async fn tool_surfaces_evaluation_failure() {
        let err = CalculatorTool
            .invoke(serde_json::json!({"expression": "1 / 0"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }
}
