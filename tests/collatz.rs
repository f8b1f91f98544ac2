//! Collatz programs: sequence generation for a given start, and reverse
//! exploration of the recurrence space via machine multiplication.

use forkvm_asm::harness::TestCase;
use forkvm_asm::toks;
use forkvm_asm::Token;

fn sequence_prog() -> Vec<Token> {
    toks![
        ".data",
        ".in", "N:", 0,

        ".entry", "main:",
        ":N", "fetch", "dup", // v v :
        ":seq", "push", // v v i :
        "dup", 4, "add", "p2c", // v v i : i=i+4
        "storeTo", // v : i

        "loop:",         // v : i
        "dup", 2, "mod", // v v%2 : ...

        ":odd", "jnz",

        "even:",
        2, "div", // v/2 : ...
        ":next", "jump",

        "odd:",
        3, "mul", 1, "add", // 3*v+1 : ...

        "next:",
        "dup",    // v v : i
        "c2p",    // v v i :
        "dup",    // v v i i :
        4, "add", // v v i i+4 :
        "p2c",     // v v i : i=i+4
        "storeTo", // v : i
        "dup",     // v v : i
        1, "eq",   // v v==1 : i
        ":loop", "jz", // v : i

        "c2p",          // v i :
        ":seq", "push", // v i base :
        2, "p2c", // v : base i
        "halt",

        ".data",
        "seq:", ".alloc", 16,
    ]
}

#[test]
fn collatz_sequence() {
    for n in 1u32..10 {
        // compute the expected collatz sequence for n
        let mut vals = vec![n];
        let mut val = n;
        loop {
            val = if val % 2 == 0 { val / 2 } else { 3 * val + 1 };
            vals.push(val);
            if val <= 1 {
                break;
            }
        }

        TestCase::new(&format!("collatz({n})"), sequence_prog())
            .input("N", &[n])
            .expect_result(&[("unnamed_output_0", &vals)])
            .run();
    }
}

// Reverse-explore the collatz recurrence space to depth 6: initialize a
// depth counter, then for any given n always explore 2*n and, when 3
// divides n-1, also explore (n-1)/3; accumulate each n into memory like
// the sequence generator, halting a branch when the counter runs out.
#[test]
fn collatz_explore() {
    TestCase::new(
        "gen collatz",
        toks![
            6, "push", // d :
            ":seq", "push", // d i :
            ":seq", "push", // d i b :
            3, "p2c", // : b i d
            1, "push", // v=1 : b i d

            "round:", // v : b i d

            "dup", 1, "sub", 3, "mod", // v (v-1)%3 : b i d
            ":third", "fz", // v : b i d
            "double:", 2, "mul", // v=2*v : b i d
            ":next", "jump", // ...
            "third:", 1, "sub", 3, "div", // v=(v-1)/3 : b i d

            "next:",        // v : b i d
            "dup", 1, "hz", // v : b i d

            "dup",    // v v : b i d
            2, "c2p", // v v d i : b
            "dup", 4, "add", "p2c", // v v d i : b i+4
            "swap",    // v v i d : b i
            "p2c",     // v v i : b i d
            "storeTo", // v : b i d

            "c2p", 1, "sub", // v d-- : b i
            "dup", "p2c", 0, "gt", // v d>0 : b i d
            ":round", "jnz", // v : b i d

            "pop", "cpop", "halt", // : b i

            ".data",
            "seq:", ".alloc", 6,
        ],
    )
    .allow_halts(&[1])
    .expect_result(&[("unnamed_output_0", &[2, 4, 8, 16, 32, 64])])
    .expect_result(&[("unnamed_output_0", &[2, 4, 8, 16, 5, 10])])
    .expect_result(&[("unnamed_output_0", &[2, 4, 1, 2, 4, 8])])
    .expect_result(&[("unnamed_output_0", &[2, 4, 1, 2, 4, 1])])
    .run()
}
