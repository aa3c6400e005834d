mod common;

#[cfg(test)]
mod tests {
    use crate::common::ModuleBuilder;
    use rstest::rstest;
    use wasmc::compiler::MissingShape;
    use wasmc::parser::instruction::{Instruction, Instruction::*, MemArg};
    use wasmc::parser::module::{BlockType, GlobalType, ValueType, ValueType::*};
    use wasmc::runtime::ImportObject;
    use wasmc::{compile, CompileError, CompilerConfiguration, ValidationError, Value};

    fn compile_body(returns: &[ValueType], body: &[Instruction]) -> Result<(), CompileError> {
        let mut builder = ModuleBuilder::new();
        builder.exported("f", &[], returns, &[], body);
        compile(&builder.build()).map(|_| ())
    }

    fn validation_error(returns: &[ValueType], body: &[Instruction]) -> ValidationError {
        match compile_body(returns, body) {
            Err(CompileError::Validation(e)) => e,
            other => panic!("expected a validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_operand_of_wrong_type() {
        let e = validation_error(
            &[],
            &[I32Const { value: 1 }, I64Const { value: 2 }, I32Add, Drop, End],
        );
        assert_eq!(
            e,
            ValidationError::StackTypeInvalid {
                opcode: "i32.add",
                expected: I32,
                actual: I64,
            }
        );
    }

    #[test]
    fn test_missing_operand() {
        let e = validation_error(&[], &[I32Const { value: 1 }, I32Add, Drop, End]);
        assert_eq!(
            e,
            ValidationError::StackTooSmall {
                opcode: "i32.add",
                expected: 2,
                actual: 1,
            }
        );
    }

    #[test]
    fn test_operands_do_not_leak_out_of_blocks() {
        let e = validation_error(
            &[],
            &[
                I32Const { value: 1 },
                Block {
                    block_type: BlockType::Empty,
                },
                Drop,
                End,
                Drop,
                End,
            ],
        );
        assert!(matches!(
            e,
            ValidationError::StackTooSmall { opcode: "drop", .. }
        ));
    }

    #[test]
    fn test_leftover_values_at_function_end() {
        let e = validation_error(&[I32], &[I32Const { value: 1 }, I32Const { value: 2 }, End]);
        assert!(matches!(e, ValidationError::StackSizeIncorrect { .. }));
    }

    #[test]
    fn test_call_argument_mismatch() {
        let mut builder = ModuleBuilder::new();
        let callee = builder.function(&[I32, I64], &[], &[], &[End]);
        builder.exported(
            "f",
            &[],
            &[],
            &[],
            &[
                I64Const { value: 1 },
                I32Const { value: 2 },
                Call { func_idx: callee },
                End,
            ],
        );
        assert!(matches!(
            compile(&builder.build()),
            Err(CompileError::Validation(
                ValidationError::StackParameterMismatch { opcode: "call", .. }
            ))
        ));
    }

    #[test]
    fn test_branch_table_label_types_must_agree() {
        let e = validation_error(
            &[I32],
            &[
                Block {
                    block_type: BlockType::Value(I32),
                },
                Block {
                    block_type: BlockType::Empty,
                },
                I32Const { value: 0 },
                I32Const { value: 0 },
                BrTable {
                    labels: vec![0],
                    default: 1,
                },
                End,
                I32Const { value: 1 },
                End,
                End,
            ],
        );
        assert_eq!(
            e,
            ValidationError::LabelTypeMismatch {
                opcode: "br_table",
                expected: BlockType::Value(I32),
                actual: BlockType::Empty,
            }
        );
    }

    #[test]
    fn test_loop_branch_takes_no_operand() {
        let mut builder = ModuleBuilder::new();
        builder.exported(
            "f",
            &[],
            &[I32],
            &[],
            &[
                Loop {
                    block_type: BlockType::Value(I32),
                },
                I32Const { value: 0 },
                BrIf { label_idx: 0 },
                I32Const { value: 3 },
                End,
                End,
            ],
        );
        let module = compile(&builder.build()).unwrap();
        let instance = module.instantiate(&ImportObject::new()).unwrap();
        assert_eq!(instance.invoke("f", &[]).unwrap(), vec![Value::I32(3)]);
    }

    #[rstest]
    #[case::after_unreachable(vec![Unreachable, I64Const { value: 5 }, End, End])]
    #[case::after_branch(vec![I32Const { value: 1 }, Br { label_idx: 0 }, F32Add, End, End])]
    #[case::after_return(vec![I32Const { value: 1 }, Return, I32Add, Drop, End, End])]
    fn test_dead_code_is_polymorphic(#[case] tail: Vec<Instruction>) {
        let mut body = vec![Block {
            block_type: BlockType::Value(I32),
        }];
        body.extend(tail);
        assert_eq!(compile_body(&[I32], &body), Ok(()));
    }

    fn compile_with_param(body: &[Instruction]) -> Result<wasmc::CompiledModule, CompileError> {
        let mut builder = ModuleBuilder::new();
        builder.exported("g", &[I32], &[I32], &[], body);
        compile(&builder.build())
    }

    #[test]
    fn test_unreachable_arm_leaves_enclosing_frame_live() {
        let body = [
            LocalGet { local_idx: 0 },
            If {
                block_type: BlockType::Empty,
            },
            Unreachable,
            Else,
            End,
            I32Add,
            End,
        ];
        assert!(matches!(
            compile_with_param(&body),
            Err(CompileError::Validation(ValidationError::StackTooSmall {
                opcode: "i32.add",
                ..
            }))
        ));

        // reached through br_if although the block ends in unreachable
        let body = [
            Block {
                block_type: BlockType::Empty,
            },
            LocalGet { local_idx: 0 },
            BrIf { label_idx: 0 },
            Unreachable,
            End,
            I32Add,
            End,
        ];
        assert!(matches!(
            compile_with_param(&body),
            Err(CompileError::Validation(ValidationError::StackTooSmall {
                opcode: "i32.add",
                ..
            }))
        ));
    }

    #[test]
    fn test_else_arm_after_unreachable_runs() {
        let body = [
            LocalGet { local_idx: 0 },
            If {
                block_type: BlockType::Value(I32),
            },
            Unreachable,
            Else,
            I32Const { value: 2 },
            End,
            End,
        ];
        let module = compile_with_param(&body).unwrap();
        let instance = module.instantiate(&ImportObject::new()).unwrap();
        assert_eq!(instance.invoke("g", &[Value::I32(0)]).unwrap(), vec![Value::I32(2)]);
        assert_eq!(
            instance.invoke("g", &[Value::I32(1)]),
            Err(wasmc::Trap::Unreachable)
        );
    }

    #[test]
    fn test_rethrow_outside_catch() {
        let mut builder = ModuleBuilder::new();
        builder.tag(&[]);
        builder.exported(
            "f",
            &[],
            &[],
            &[],
            &[
                Try {
                    block_type: BlockType::Empty,
                },
                Rethrow { label_idx: 0 },
                End,
                End,
            ],
        );
        assert!(matches!(
            compile(&builder.build()),
            Err(CompileError::Validation(
                ValidationError::InvalidRethrowTarget { depth: 0, .. }
            ))
        ));
    }

    #[rstest]
    #[case::branch_depth(vec![Br { label_idx: 3 }, End])]
    #[case::local_index(vec![LocalGet { local_idx: 4 }, Drop, End])]
    #[case::function_index(vec![Call { func_idx: 9 }, End])]
    #[case::global_index(vec![GlobalGet { global_idx: 0 }, Drop, End])]
    #[case::tag_index(vec![Throw { tag_idx: 0 }, End])]
    #[case::memory_required(vec![MemorySize { mem_idx: 0 }, Drop, End])]
    #[case::table_required(vec![I32Const { value: 0 }, CallIndirect { type_idx: 0, table_idx: 0 }, End])]
    #[case::else_without_if(vec![Else, End])]
    fn test_compiler_errors(#[case] body: Vec<Instruction>) {
        assert!(matches!(
            compile_body(&[], &body),
            Err(CompileError::Compiler(_))
        ));
    }

    #[test]
    fn test_load_requires_memory() {
        let body = [
            I32Const { value: 0 },
            I32Load {
                memarg: MemArg {
                    align: 2,
                    offset: 0,
                },
            },
            Drop,
            End,
        ];
        assert!(matches!(
            compile_body(&[], &body),
            Err(CompileError::Compiler(_))
        ));
    }

    #[test]
    fn test_immutable_global_cannot_be_set() {
        let mut builder = ModuleBuilder::new();
        let g = builder.global(
            GlobalType {
                content_type: I32,
                mutable: false,
            },
            &[I32Const { value: 0 }, End],
        );
        builder.exported(
            "f",
            &[],
            &[],
            &[],
            &[I32Const { value: 1 }, GlobalSet { global_idx: g }, End],
        );
        assert!(matches!(
            compile(&builder.build()),
            Err(CompileError::Compiler(_))
        ));
    }

    #[test]
    fn test_global_initializer_type() {
        let mut builder = ModuleBuilder::new();
        builder.global(
            GlobalType {
                content_type: I32,
                mutable: false,
            },
            &[I64Const { value: 0 }, End],
        );
        assert!(compile(&builder.build()).is_err());
    }

    #[test]
    fn test_function_local_limit() {
        let mut builder = ModuleBuilder::new();
        builder.exported("f", &[I32, I32], &[], &[I64], &[End]);
        let config = CompilerConfiguration::default().with_max_function_locals(2);
        assert!(matches!(
            wasmc::compile_with(&builder.build(), &config),
            Err(CompileError::Compiler(_))
        ));
    }

    #[test]
    fn test_data_segment_length_limit() {
        let mut builder = ModuleBuilder::new();
        builder.memory(1, None);
        builder.passive_data(&[0u8; 64]);
        let bytes = builder.build();
        assert!(compile(&bytes).is_ok());

        let config = CompilerConfiguration::default().with_max_data_segment_length(32);
        assert!(matches!(
            wasmc::compile_with(&bytes, &config),
            Err(CompileError::Compiler(_))
        ));
    }

    #[test]
    fn test_missing_shapes_reported_together() {
        let wide: Vec<ValueType> = vec![I32; 20];
        let mut builder = ModuleBuilder::new();
        builder.import_function("env", "a", &wide, &[]);
        builder.import_function("env", "ok", &[I32], &[I32]);
        builder.import_function("env", "b", &wide, &[I64]);
        let config = CompilerConfiguration::default().with_max_callable_parameters(16);
        match wasmc::compile_with(&builder.build(), &config) {
            Err(CompileError::MissingShape(e)) => {
                let fields: Vec<&str> = e.missing.iter().map(|m| m.field.as_str()).collect();
                assert_eq!(fields, vec!["a", "b"]);
                assert_eq!(
                    e.missing[1],
                    MissingShape {
                        module: "env".into(),
                        field: "b".into(),
                        parameters: 20,
                        returns: 1,
                    }
                );
            }
            other => panic!("expected missing shapes, got {other:?}"),
        }
    }
}
