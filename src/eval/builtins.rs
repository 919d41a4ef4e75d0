// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::rc::Rc;

use data_encoding::BASE64;
use log::debug;

use crate::crypt::decode_ciphertext;
use crate::provider::Provider;
use crate::schema::Schema;
use crate::value::{Data, Value};

use super::graph::*;
use super::validate::{Loc, Validator};
use super::EvalContext;

impl EvalContext<'_> {
    /// Evaluates `x` and checks the result against `accept`. Errors are
    /// reported at `path` relative to `x`.
    pub(super) fn evaluate_typed_expr(&mut self, x: ExprId, accept: &Schema, path: &str) -> (ValueId, bool) {
        let v = self.evaluate_expr(x);

        let mut validator = Validator::new(&*self.graph);
        let ok = validator.validate_value(v, accept, &Loc::new(x, path));
        let diags = validator.finish();
        self.diags.extend(diags);
        (v, ok)
    }

    fn builtin_value(&mut self, x: ExprId) -> ValueId {
        let schema = self.graph.expr(x).schema.clone();
        self.graph.add_value(ValueNode::new(x, schema, Repr::Null))
    }

    fn set_unknown(&mut self, v: ValueId) -> ValueId {
        self.graph.value_mut(v).unknown = true;
        v
    }

    fn set_string(&mut self, v: ValueId, s: String) -> ValueId {
        self.graph.value_mut(v).repr = Repr::String(s);
        v
    }

    pub(super) fn evaluate_from_base64(&mut self, x: ExprId, s: ExprId) -> ValueId {
        let v = self.builtin_value(x);

        let (s, ok) = self.evaluate_typed_expr(s, &Schema::string(), "");
        if !ok {
            return self.set_unknown(v);
        }
        self.graph.combine(v, &[s]);
        if self.graph.value(v).unknown {
            return v;
        }

        let encoded = self.graph.as_str(s).unwrap_or_default().to_string();
        let decoded = BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| e.to_string())
            .and_then(|b| String::from_utf8(b).map_err(|e| e.to_string()));
        match decoded {
            Ok(decoded) => self.set_string(v, decoded),
            Err(e) => {
                self.error(x, format!("decoding base64 string: {e}"));
                self.set_unknown(v)
            }
        }
    }

    pub(super) fn evaluate_from_json(&mut self, x: ExprId, s: ExprId) -> ValueId {
        let v = self.builtin_value(x);

        let (s, ok) = self.evaluate_typed_expr(s, &Schema::string(), "");
        if !ok {
            return self.set_unknown(v);
        }
        self.graph.combine(v, &[s]);
        if self.graph.value(v).unknown {
            return v;
        }

        let text = self.graph.as_str(s).unwrap_or_default();
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(json) => {
                let secret = self.graph.value(v).secret;
                self.graph.unexport(&Value::from_json(&json, secret), x)
            }
            Err(e) => {
                self.error(x, format!("decoding JSON string: {e}"));
                self.set_unknown(v)
            }
        }
    }

    pub(super) fn evaluate_join(&mut self, x: ExprId, delimiter: ExprId, values: ExprId) -> ValueId {
        let v = self.builtin_value(x);

        let (delimiter, delimiter_ok) = self.evaluate_typed_expr(delimiter, &Schema::string(), "");
        let strings = Schema::array().items(Schema::string());
        let (values, values_ok) = self.evaluate_typed_expr(values, &strings, "");
        if !delimiter_ok || !values_ok {
            return self.set_unknown(v);
        }
        self.graph.combine(v, &[delimiter, values]);
        if self.graph.value(v).unknown {
            return v;
        }

        let items = match &self.graph.value(values).repr {
            Repr::Array(items) => items.clone(),
            _ => vec![],
        };
        let parts: Vec<&str> = items
            .iter()
            .map(|i| self.graph.as_str(*i).unwrap_or_default())
            .collect();
        let joined = parts.join(self.graph.as_str(delimiter).unwrap_or_default());
        self.set_string(v, joined)
    }

    pub(super) fn evaluate_to_base64(&mut self, x: ExprId, s: ExprId) -> ValueId {
        let v = self.builtin_value(x);

        let (s, ok) = self.evaluate_typed_expr(s, &Schema::string(), "");
        if !ok {
            return self.set_unknown(v);
        }
        self.graph.combine(v, &[s]);
        if self.graph.value(v).unknown {
            return v;
        }

        let encoded = BASE64.encode(self.graph.as_str(s).unwrap_or_default().as_bytes());
        self.set_string(v, encoded)
    }

    pub(super) fn evaluate_to_json(&mut self, x: ExprId, value: ExprId) -> ValueId {
        let v = self.builtin_value(x);

        let value = self.evaluate_expr(value);
        self.graph.combine(v, &[value]);
        if self.graph.value(v).unknown {
            return v;
        }

        let json = self.graph.export_value(value, "").to_json(false);
        match serde_json::to_string(&json) {
            Ok(encoded) => self.set_string(v, encoded),
            Err(e) => {
                self.error(x, format!("failed to encode JSON: {e}"));
                self.set_unknown(v)
            }
        }
    }

    pub(super) fn evaluate_to_string(&mut self, x: ExprId, value: ExprId) -> ValueId {
        let v = self.builtin_value(x);

        let value = self.evaluate_expr(value);
        let (s, unknown, secret) = self.graph.to_string(value);
        let node = self.graph.value_mut(v);
        node.unknown = unknown;
        node.secret = secret;
        if !unknown {
            node.repr = Repr::String(s);
        }
        v
    }

    pub(super) fn evaluate_secret(&mut self, x: ExprId, secret: &SecretRepr) -> ValueId {
        let text = match secret {
            SecretRepr::Plaintext(plaintext) => return self.evaluate_expr(*plaintext),
            SecretRepr::Ciphertext { text, .. } => text.clone(),
        };

        let v = self.builtin_value(x);
        self.graph.value_mut(v).secret = true;

        let ciphertext = match decode_ciphertext(&text) {
            Ok(ciphertext) => ciphertext,
            Err(e) => {
                self.error(x, format!("invalid ciphertext: {e}"));
                return self.set_unknown(v);
            }
        };
        if !self.decrypt_secrets() {
            return self.set_unknown(v);
        }
        if let Err(e) = self.ctx.check() {
            self.error(x, e.to_string());
            return self.set_unknown(v);
        }

        debug!("decrypting secret in {}", self.name);
        let plaintext = match self.decrypter.decrypt(self.ctx, &ciphertext) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                self.error(x, format!("decrypting: {e}"));
                return self.set_unknown(v);
            }
        };
        match String::from_utf8(plaintext) {
            Ok(plaintext) => self.set_string(v, plaintext),
            Err(e) => {
                self.error(x, format!("decrypting: {e}"));
                self.set_unknown(v)
            }
        }
    }

    // Loads a provider and adopts its schemas for the call.
    fn load_provider(&mut self, x: ExprId, name: &str) -> Option<Box<dyn Provider>> {
        if let Err(e) = self.ctx.check() {
            self.error(x, e.to_string());
            return None;
        }

        let provider = match self.providers.load_provider(self.ctx, name) {
            Ok(provider) => provider,
            Err(e) => {
                self.error(x, e.to_string());
                return None;
            }
        };

        let (inputs, outputs) = provider.schema();
        match inputs.compile() {
            Ok(()) => {
                if let ExprRepr::Open { input_schema, .. } = &mut self.graph.expr_mut(x).repr {
                    *input_schema = inputs;
                }
            }
            Err(e) => self.error(x, format!("internal error: invalid input schema ({e})")),
        }
        match outputs.compile() {
            Ok(()) => self.graph.expr_mut(x).schema = outputs,
            Err(e) => self.error(x, format!("internal error: invalid schema ({e})")),
        }
        Some(provider)
    }

    pub(super) fn evaluate_open(&mut self, x: ExprId, provider: &Rc<str>, inputs: ExprId) -> ValueId {
        let provider = self.load_provider(x, provider);
        let v = self.builtin_value(x);

        let input_schema = match &self.graph.expr(x).repr {
            ExprRepr::Open { input_schema, .. } => input_schema.clone(),
            _ => Schema::always(),
        };
        let (inputs, ok) = self.evaluate_typed_expr(inputs, &input_schema, "inputs");
        let Some(provider) = provider else {
            return self.set_unknown(v);
        };
        if !ok || self.validating || self.graph.contains_unknowns(inputs) {
            return self.set_unknown(v);
        }

        let inputs = match self.graph.export_value(inputs, self.name).value {
            Data::Object(inputs) => inputs,
            _ => {
                self.error(x, "the inputs to fn::open must be an object");
                return self.set_unknown(v);
            }
        };
        if let Err(e) = self.ctx.check() {
            self.error(x, e.to_string());
            return self.set_unknown(v);
        }

        debug!("opening provider in {}", self.name);
        match provider.open(self.ctx, &inputs) {
            Ok(output) => self.graph.unexport(&output, x),
            Err(e) => {
                self.error(x, e.to_string());
                self.set_unknown(v)
            }
        }
    }
}
