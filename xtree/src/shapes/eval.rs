use super::Sdf;
use crate::{
    Error,
    eval::{BATCH_SIZE, Evaluator, Grad, Interval, IntervalOutput},
};
use nalgebra::Vector3;
use std::sync::Arc;

/// Evaluator for [`Sdf`] expression trees
#[derive(Clone)]
pub struct SdfEval {
    points: Vec<Vector3<f32>>,
    values: Vec<f32>,
    grads: Vec<Grad>,
    ambiguous: Vec<bool>,
}

impl Default for SdfEval {
    fn default() -> Self {
        Self {
            points: vec![Vector3::zeros(); BATCH_SIZE],
            values: vec![0.0; BATCH_SIZE],
            grads: vec![Grad::default(); BATCH_SIZE],
            ambiguous: vec![false; BATCH_SIZE],
        }
    }
}

impl SdfEval {
    fn check(count: usize) -> Result<(), Error> {
        if count > BATCH_SIZE {
            Err(Error::BatchTooLarge(count, BATCH_SIZE))
        } else {
            Ok(())
        }
    }
}

impl Evaluator for SdfEval {
    type Tape = Arc<Sdf>;

    fn interval(
        &mut self,
        lower: Vector3<f32>,
        upper: Vector3<f32>,
        tape: &Self::Tape,
    ) -> Result<IntervalOutput<Self::Tape>, Error> {
        let [x, y, z] = [0, 1, 2].map(|i| Interval::new(lower[i], upper[i]));
        let (bounds, simplified) = tape.interval(x, y, z);
        let tape = (!Arc::ptr_eq(tape, &simplified)).then_some(simplified);
        Ok(IntervalOutput { bounds, tape })
    }

    fn set(&mut self, p: Vector3<f32>, slot: usize) -> Result<(), Error> {
        Self::check(slot + 1)?;
        self.points[slot] = p;
        Ok(())
    }

    fn values(
        &mut self,
        count: usize,
        tape: &Self::Tape,
    ) -> Result<&[f32], Error> {
        Self::check(count)?;
        for (v, p) in self.values.iter_mut().zip(&self.points).take(count) {
            *v = tape.value(*p);
        }
        Ok(&self.values[..count])
    }

    fn derivs(
        &mut self,
        count: usize,
        tape: &Self::Tape,
    ) -> Result<&[Grad], Error> {
        Self::check(count)?;
        for (g, p) in self.grads.iter_mut().zip(&self.points).take(count) {
            *g = tape.grad(*p);
        }
        Ok(&self.grads[..count])
    }

    fn ambiguous(
        &mut self,
        count: usize,
        tape: &Self::Tape,
    ) -> Result<&[bool], Error> {
        Self::check(count)?;
        for (a, p) in self.ambiguous.iter_mut().zip(&self.points).take(count) {
            *a = tape.is_ambiguous(*p);
        }
        Ok(&self.ambiguous[..count])
    }

    fn features(
        &mut self,
        p: Vector3<f32>,
        tape: &Self::Tape,
    ) -> Result<Vec<Vector3<f32>>, Error> {
        Ok(tape.features(p).iter().map(Grad::gradient).collect())
    }

    fn is_inside(
        &mut self,
        p: Vector3<f32>,
        tape: &Self::Tape,
    ) -> Result<bool, Error> {
        let v = tape.value(p);
        if v < 0.0 {
            Ok(true)
        } else if v > 0.0 {
            Ok(false)
        } else {
            // On the surface, the point counts as inside if any feature has
            // a direction in which the field decreases
            Ok(tape.features(p).iter().any(|f| f.gradient().norm() > 0.0))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn batch_eval() {
        let s = Sdf::sphere(Vector3::zeros(), 1.0);
        let mut eval = SdfEval::default();
        eval.set(Vector3::new(0.0, 0.0, 0.0), 0).unwrap();
        eval.set(Vector3::new(2.0, 0.0, 0.0), 1).unwrap();
        assert_eq!(eval.values(2, &s).unwrap(), &[-1.0, 1.0]);
        let ds = eval.derivs(2, &s).unwrap();
        assert_eq!(ds[1], Grad::new(1.0, 1.0, 0.0, 0.0));
        // Gradient at the center is undefined
        assert!(ds[0].dx.is_nan());
        assert_eq!(eval.ambiguous(2, &s).unwrap(), &[false, false]);
    }

    #[test]
    fn batch_too_large() {
        let s = Sdf::constant(1.0);
        let mut eval = SdfEval::default();
        assert!(matches!(
            eval.set(Vector3::zeros(), BATCH_SIZE),
            Err(Error::BatchTooLarge(..))
        ));
        assert!(eval.values(BATCH_SIZE + 1, &s).is_err());
        assert!(eval.values(BATCH_SIZE, &s).is_ok());
    }

    #[test]
    fn is_inside() {
        let s = Sdf::plane(Vector3::new(1.0, 0.0, 0.0), 0.0);
        let mut eval = SdfEval::default();
        assert!(eval.is_inside(Vector3::new(-1.0, 0.0, 0.0), &s).unwrap());
        assert!(!eval.is_inside(Vector3::new(1.0, 0.0, 0.0), &s).unwrap());
        assert!(eval.is_inside(Vector3::zeros(), &s).unwrap());

        let c = Sdf::constant(0.0);
        assert!(!eval.is_inside(Vector3::zeros(), &c).unwrap());
    }

    #[test]
    fn interval_narrowing() {
        let s = Sdf::intersection(
            Sdf::sphere(Vector3::zeros(), 1.0),
            Sdf::plane(Vector3::new(0.0, 0.0, 1.0), 0.0),
        );
        let mut eval = SdfEval::default();
        let out = eval
            .interval(
                Vector3::new(-0.1, -0.1, -3.0),
                Vector3::new(0.1, 0.1, -2.0),
                &s,
            )
            .unwrap();
        // Far below the plane, only the sphere matters
        let t = out.tape.unwrap();
        assert_eq!(t.size(), 1);
        assert!(out.bounds.lower() > 0.0);

        let out = eval
            .interval(
                Vector3::new(-1.0, -1.0, -1.0),
                Vector3::new(1.0, 1.0, 1.0),
                &s,
            )
            .unwrap();
        assert!(out.tape.is_none());
        assert!(out.bounds.contains(0.0));
    }
}
