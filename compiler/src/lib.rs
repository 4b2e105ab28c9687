// loopinit - loop runtime-parameter resolution for lowered kernels
//
// Library root. Front end (lexer, parser, lower) builds the linear IR;
// `init_loops` computes work amounts, pointer increments and finalization
// offsets; `pipeline` runs the passes.

pub mod ast;
pub mod diag;
pub mod dim;
pub mod id;
pub mod init_loops;
pub mod ir;
pub mod lexer;
pub mod loops;
pub mod lower;
pub mod node;
pub mod parser;
pub mod pass;
pub mod pipeline;
pub mod report;
