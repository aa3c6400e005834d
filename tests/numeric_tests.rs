//! Numeric semantics checked against JSON fixtures.
//!
//! Each fixture function is a hex-encoded instruction sequence compiled into
//! its own module and run once per case. Values are written `type:text`, where
//! floats may be given as `0x` bit patterns; an expected `nan` accepts any NaN.

mod common;

#[cfg(test)]
mod tests {
    use crate::common::ModuleBuilder;
    use rstest::rstest;
    use serde::de::{self, Deserializer};
    use serde::Deserialize;
    use std::fs;
    use wasmc::parser::module::ValueType;
    use wasmc::{compile, ImportObject, Value};

    #[derive(Deserialize)]
    struct Fixture {
        functions: Vec<Function>,
    }

    #[derive(Deserialize)]
    struct Function {
        name: String,
        params: Vec<String>,
        result: String,
        body: HexBytes,
        cases: Vec<Case>,
    }

    #[derive(Deserialize)]
    struct Case {
        args: Vec<String>,
        #[serde(default)]
        expected: Option<String>,
        #[serde(default)]
        trap: Option<String>,
    }

    struct HexBytes(Vec<u8>);

    impl<'de> Deserialize<'de> for HexBytes {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s: String = String::deserialize(deserializer)?;
            let decoded = hex::decode(s).map_err(de::Error::custom)?;
            Ok(HexBytes(decoded))
        }
    }

    fn value_type(name: &str) -> ValueType {
        match name {
            "i32" => ValueType::I32,
            "i64" => ValueType::I64,
            "f32" => ValueType::F32,
            "f64" => ValueType::F64,
            other => panic!("unknown value type {other}"),
        }
    }

    fn parse_value(text: &str) -> Value {
        let (typ, value) = text
            .split_once(':')
            .unwrap_or_else(|| panic!("value {text} has no type"));
        Value::parse(typ, value).unwrap()
    }

    fn check_expected(name: &str, expected: &str, actual: Value) {
        match expected.split_once(':') {
            Some((typ, "nan")) => {
                assert_eq!(actual.typ(), value_type(typ), "{name}");
                let is_nan = match actual {
                    Value::F32(v) => v.is_nan(),
                    Value::F64(v) => v.is_nan(),
                    _ => false,
                };
                assert!(is_nan, "{name}: expected NaN, got {actual}");
            }
            _ => {
                let expected = parse_value(expected);
                // bitwise, so signed zeros are told apart
                assert_eq!(
                    (actual.typ(), actual.bits()),
                    (expected.typ(), expected.bits()),
                    "{name}: expected {expected}, got {actual}"
                );
            }
        }
    }

    #[rstest]
    #[case("tests/fixtures/integer.json")]
    #[case("tests/fixtures/float.json")]
    #[case("tests/fixtures/conversion.json")]
    fn test_numeric_fixture(#[case] path: &str) {
        let json = fs::read_to_string(path).unwrap();
        let fixture: Fixture = serde_json::from_str(&json).unwrap();

        for function in fixture.functions {
            let params: Vec<ValueType> = function.params.iter().map(|p| value_type(p)).collect();
            let result = value_type(&function.result);

            let mut builder = ModuleBuilder::new();
            builder.exported_code("run", &params, &[result], &function.body.0);
            let module = compile(&builder.build())
                .unwrap_or_else(|e| panic!("{}: {e}", function.name));
            let instance = module.instantiate(&ImportObject::new()).unwrap();

            for case in &function.cases {
                let args: Vec<Value> = case.args.iter().map(|a| parse_value(a)).collect();
                let outcome = instance.invoke("run", &args);
                match (&case.expected, &case.trap) {
                    (Some(expected), None) => {
                        let results = outcome.unwrap_or_else(|t| {
                            panic!("{} {:?}: unexpected trap {t}", function.name, case.args)
                        });
                        assert_eq!(results.len(), 1);
                        check_expected(&function.name, expected, results[0]);
                    }
                    (None, Some(trap)) => {
                        let error = outcome.expect_err(&function.name);
                        assert_eq!(&error.to_string(), trap, "{} {:?}", function.name, case.args);
                    }
                    _ => panic!("{}: a case needs exactly one of expected or trap", function.name),
                }
            }
        }
    }
}
