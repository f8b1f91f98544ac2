//! End-to-end coverage of single ops and machine features, driven through
//! the assembler and the table harness.

use forkvm_asm::harness::{TestCase, TestCases};
use forkvm_asm::toks;

#[test]
fn stack_ops() {
    TestCases(vec![
        TestCase::new("0 push", toks![0, "push", 1, "hnz", "halt"]),
        TestCase::new("1 push", toks![1, "push", 1, "hz", "halt"]),
        TestCase::new(
            "bare push is a decode error",
            toks!["push", 1, "hnz", "halt"],
        )
        .expect_err("missing required immediate for push"),
        TestCase::new("dup and swap", toks![
            1, "push", 2, "push",
            "swap",          // 2 1
            "dup",           // 2 1 1
            "add",           // 2 2
            "eq", 1, "hz",
            "halt",
        ]),
    ])
    .run()
}

#[test]
fn misc_ops() {
    TestCase::new(
        "nuthin' doin'",
        toks!["nop", "nop", "nop", "nop", "halt"],
    )
    .run()
}

#[test]
fn basic_math() {
    TestCases(vec![
        TestCase::new(
            "33addeq5 should fail",
            toks![
                3, "push", 3, "push", "add",
                5, "push", "eq",
                1, "hz", "halt",
            ],
        )
        .expect_err("HALT(1)"),
        TestCase::new(
            "23addeq5 should succeed",
            toks![
                2, "push", 3, "push", "add",
                5, "push", "eq",
                1, "hz", "halt",
            ],
        ),
        TestCase::new(
            "divmod",
            toks![
                17, "push", 5, "divmod",
                2, "push", "eq", 1, "hz",  // remainder on top
                3, "push", "eq", 1, "hz",
                "halt",
            ],
        ),
        TestCase::new(
            "divide by zero",
            toks![1, "push", 0, "div", "halt"],
        )
        .expect_err("divide by zero"),
    ])
    .run()
}

#[test]
fn operational_errors() {
    TestCases(vec![
        TestCase::raw(
            "invalid op code",
            vec![
                0x00, // end-of-options
                0x70, // undefined op code
            ],
        )
        .expect_err("invalid op UNDEFINED<0x70>"),
        TestCase::raw(
            "crash: explicit",
            vec![
                0x00, // end-of-options
                0x00, // the crash op
            ],
        )
        .expect_err("crashed"),
        TestCase::raw(
            "crash: implicit",
            vec![
                0x00, // end-of-options; empty program, memory reads 0
            ],
        )
        .expect_err("crashed"),
        TestCase::new(
            "crash: jump out of program",
            toks![96, "jump", "halt"],
        )
        .expect_err("crashed"),
        TestCase::new(
            "crash: implicit assembled",
            toks![
                1, "push",
                2, "add",
                // and then?...
            ],
        )
        .expect_err("crashed"),
        TestCase::new(
            "maxops stops an infinite loop",
            toks![
                ".maxOps", 100,
                1, "push",
                "loop:",
                1, "add",
                ":loop", "jump",
                0, "halt",
            ],
        )
        .expect_err("op count limit exceeded"),
        TestCase::new(
            "maxcopies stops an infinite copy loop",
            toks![
                ".maxCopies", 100,
                "foo:", ":bar", "fork", 1, "halt",
                "bar:", ":foo", "fork", 2, "halt",
                3, "halt",
            ],
        )
        .allow_halts(&[1, 2])
        .expect_err("max copies(100) exceeded"),
    ])
    .run()
}

#[test]
fn data_refs() {
    TestCase::new(
        "mod-10 check",
        toks![
            ".data",
            "d:", 4, 2, 7, 9, 8,

            ".text",
            ".entry", "main:",
            ":d", "fetch", // d[0] :
            4, ":d", "push", "fetch", // d[0] d[1] :
            8, ":d", "push", "fetch", // d[0] d[1] d[2] :
            12, ":d", "push", "fetch", // d[0] d[1] d[2] d[3] :
            16, ":d", "push", "fetch", // d[0] d[1] d[2] d[3] d[4] :
            "add", "add", "add", "add", // s=d[0]+d[1]+d[2]+d[3]+d[4] :
            10, "mod", // s%10 :
            1, "hnz", // : -- error halt if non-zero
            "halt", // : normal halt
        ],
    )
    .run()
}

#[test]
fn bitwise_masking() {
    TestCase::new(
        "masking",
        toks![
            0xdead, "push", 16, "shiftl",
            0xbeef, "bitor",
            "dup", 0xdeadbeefi64, "eq", 1, "hz",

            "dup", 0xffff, "bitand",
            0xbeef, "eq", 1, "hz",

            "dup",
            0xffff, "push", "bitnot", "bitand",
            16, "shiftr",
            0xdead, "eq", 1, "hz",

            "halt",
        ],
    )
    .run()
}

#[test]
fn bitwise_binary_ops() {
    TestCases(vec![
        TestCase::new("bitand", toks![
            0xff, "push", 0x12, "push", "bitand",
            0x12, "eq", 1, "hz",
            0x0f, "push", 0x12, "bitand",
            0x02, "eq", 1, "hz",
            "halt",
        ]),
        TestCase::new("bitor", toks![
            1, "push", 2, "push", "bitor",
            3, "eq", 1, "hz",
            3, "push", 6, "bitor",
            7, "eq", 1, "hz",
            "halt",
        ]),
        TestCase::new("bitxor", toks![
            0x42, "push",
            0x99, "push", "bitxor",
            0xed, "bitxor",
            "dup", 0x42 ^ 0x99 ^ 0xed, "eq", 1, "hz",

            "dup",
            0x99, "bitxor",
            0xed, "bitxor",
            0x42, "eq", 1, "hz",

            "dup",
            0xed, "bitxor",
            0x42, "bitxor",
            0x99, "eq", 1, "hz",

            "dup",
            0x42, "bitxor",
            0x99, "bitxor",
            0xed, "eq", 1, "hz",

            "halt",
        ]),
    ])
    .run()
}

#[test]
fn bit_vector_ops() {
    TestCase::new(
        "bit set & test & clear",
        toks![
            // set some bits
            40, "push", ":vec", "bitset",
            42, "push", ":vec", "push", "bitset",
            99, "push", ":vec", "bitset",

            // test for them, and some near misses
            39, "push", ":vec", "bitest", 1, "hnz",
            40, "push", ":vec", "bitest", 1, "hz",
            41, "push", ":vec", "bitest", 1, "hnz",
            42, "push", ":vec", "push", "bitest", 1, "hz",
            43, "push", ":vec", "push", "bitest", 1, "hnz",
            98, "push", ":vec", "bitest", 1, "hnz",
            99, "push", ":vec", "bitest", 1, "hz",
            100, "push", ":vec", "bitest", 1, "hnz",

            // clear some bits
            42, "push", ":vec", "bitost",
            99, "push", ":vec", "push", "bitost",

            // test that they're now cleared
            42, "push", ":vec", "push", "bitest", 1, "hnz",
            99, "push", ":vec", "bitest", 1, "hnz",

            // atomic sets report whether they changed the bit
            43, "push", ":vec", "push", "bitseta", 1, "hz",
            43, "push", ":vec", "push", "bitseta", 1, "hnz",
            44, "push", ":vec", "bitseta", 1, "hz",
            44, "push", ":vec", "bitseta", 1, "hnz",

            // atomic clears likewise
            43, "push", ":vec", "push", "bitosta", 1, "hz",
            43, "push", ":vec", "push", "bitosta", 1, "hnz",
            44, "push", ":vec", "bitosta", 1, "hz",
            44, "push", ":vec", "bitosta", 1, "hnz",

            "halt",

            // 4 * 32 = 128 bits
            "vec:", ".data", ".alloc", 4,
        ],
    )
    .run()
}

#[test]
fn queue_size() {
    let prog = |queue_size: i64| {
        toks![
            ".queueSize", queue_size,
            ":lol", "fork",
            ":wut", "fork",
            0, "halt",
            "lol:", 1, "halt",
            "wut:", 2, "halt",
            "halt",
        ]
    };
    TestCase::new("exceeded", prog(1))
        .allow_halts(&[1, 2])
        .expect_err("run queue full")
        .run();
    TestCase::new("sufficient", prog(2))
        .allow_halts(&[1, 2])
        .expect_result(&[])
        .run();
}

#[test]
fn named_input_and_output() {
    for n in 0u32..10 {
        TestCase::new(
            &format!("square({n})"),
            toks![
                ".data",
                ".in", "N:", 0,
                ".out", "M:", 0,

                ".entry", "main:",
                ":N", "fetch", // N :
                "dup", "mul", // N*N :
                ":M", "storeTo", // :   -- M=N*N
                "halt",
            ],
        )
        .input("N", &[n])
        .expect_result(&[("M", &[n * n])])
        .run();
    }
}

#[test]
fn marks_make_output_regions() {
    TestCase::new(
        "marked stack window",
        toks![
            "mark",
            1, "push", 2, "push", 3, "push",
            "mark",
            "halt",
        ],
    )
    .expect_result(&[("unnamed_output_0", &[1, 2, 3])])
    .run()
}

#[test]
fn call_and_ret() {
    TestCase::new(
        "square via call",
        toks![
            5, "push",
            ":sq", "call",
            25, "eq", 1, "hz",
            "halt",
            "sq:", "dup", "mul", "ret",
        ],
    )
    .run()
}
