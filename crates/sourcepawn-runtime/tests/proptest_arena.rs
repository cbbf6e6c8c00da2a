//! Property-based tests for the execution arena.
//!
//! Random sequences of heap and stack operations must keep the layout
//! ordered, keep the stack margin, and leave the arena untouched whenever
//! an operation fails.

use proptest::prelude::*;
use sourcepawn_runtime::{Arena, Cell, CELL_SIZE, STACK_MARGIN};

#[derive(Debug, Clone)]
enum Op {
    Alloc(u32),
    PopTop,
    Push(Cell),
    Pop,
    Write(Cell, Cell),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u32..96).prop_map(Op::Alloc),
        Just(Op::PopTop),
        any::<Cell>().prop_map(Op::Push),
        Just(Op::Pop),
        // Heap headers live in [32, 956); cell-aligned writes stay clear of them.
        (prop_oneof![-2..8i32, 240..275i32], any::<Cell>())
            .prop_map(|(cell, value)| Op::Write(cell * CELL_SIZE, value)),
    ]
}

fn check_layout(arena: &Arena) {
    assert!(arena.heap_base() <= arena.hp());
    assert!(arena.hp() <= arena.sp());
    assert!(arena.sp() <= arena.stack_top());
    assert!(arena.sp() - arena.hp() >= STACK_MARGIN);
}

proptest! {
    #[test]
    fn prop_layout_invariants_hold(ops in prop::collection::vec(op(), 1..200)) {
        let mut arena = Arena::new(&[7; 32], 1024).unwrap();
        let mut allocations: Vec<Cell> = Vec::new();

        for op in ops {
            let before = (arena.hp(), arena.sp());
            let failed = match op {
                Op::Alloc(cells) => match arena.heap_alloc(cells) {
                    Ok(local) => {
                        allocations.push(local);
                        false
                    }
                    Err(_) => true,
                },
                Op::PopTop => match allocations.last() {
                    Some(&local) => {
                        arena.heap_pop(local).unwrap();
                        allocations.pop();
                        false
                    }
                    None => arena.heap_pop(arena.heap_base() + 4).is_err(),
                },
                Op::Push(value) => arena.push(value).is_err(),
                Op::Pop => arena.pop().is_err(),
                Op::Write(addr, value) => {
                    let ok = arena.write_cell(addr, value).is_ok();
                    if ok {
                        prop_assert!(addr < arena.hp() || addr >= arena.sp());
                        prop_assert_eq!(arena.read_cell(addr), Ok(value));
                    }
                    !ok
                }
            };

            if failed {
                prop_assert_eq!((arena.hp(), arena.sp()), before);
            }
            check_layout(&arena);
        }
    }

    #[test]
    fn prop_push_pop_is_lifo(values in prop::collection::vec(any::<Cell>(), 0..200)) {
        let mut arena = Arena::new(&[], 1024).unwrap();
        let mut pushed = Vec::new();
        for &value in &values {
            if arena.push(value).is_ok() {
                pushed.push(value);
            }
        }
        while let Some(expected) = pushed.pop() {
            prop_assert_eq!(arena.pop(), Ok(expected));
        }
        prop_assert_eq!(arena.sp(), arena.stack_top());
        prop_assert!(arena.pop().is_err());
    }
}
