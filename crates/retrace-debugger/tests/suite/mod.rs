mod breakpoints;
mod interrupt;
mod recovery;
mod session;
mod support;
mod travel;
