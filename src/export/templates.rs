//! Fixed sources written next to the generated code

/// Shared library holding `rhs` and `rhs_jac`
pub const MODEL_LIB: &str = "model.so";
/// Shared library holding `integrate`
pub const INTEGRATOR_LIB: &str = "integrator.so";

/// Translation units compiled into both libraries, in link order
pub const SOURCES: [&str; 3] = ["workspace.c", "model.c", "integrator.c"];

/// Global buffers the generated integrator expects to be defined elsewhere
pub const WORKSPACE: &str = "\
#include <acado.h>
ACADOworkspace acadoWorkspace;
ACADOvariables acadoVariables;
";

/// Build script compiling `sources` into [`MODEL_LIB`] and [`INTEGRATOR_LIB`].
///
/// Each compile and link prints a single `CC`/`LD` line instead of the full command.
pub fn makefile(sources: &[&str]) -> String {
    format!(
        "CC      = gcc\n\
         CFLAGS  = -O3 -fPIC -finline-functions -I.\n\
         LDFLAGS = -lm\n\
         \n\
         C_SRC = {sources}\n\
         OBJ = $(C_SRC:%.c=%.o)\n\
         \n\
         .PHONY: all clean obj\n\
         \n\
         all : {model} {integrator}\n\
         \n\
         %.o : %.c acado.h\n\
         \t@echo CC $@\n\
         \t@$(CC) $(CFLAGS) -c $< -o $@\n\
         \n\
         %.so : $(OBJ)\n\
         \t@echo LD $@\n\
         \t@$(CC) -shared -Wl,-soname,$@ -o $@ $(OBJ) $(LDFLAGS)\n\
         \n\
         obj : $(OBJ)\n\
         \n\
         clean :\n\
         \trm -f *.o *.so\n",
        sources = sources.join(" "),
        model = MODEL_LIB,
        integrator = INTEGRATOR_LIB,
    )
}
