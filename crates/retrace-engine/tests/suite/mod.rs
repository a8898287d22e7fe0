mod child;
mod replay;
mod support;
mod travel;
