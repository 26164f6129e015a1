//! Selection and recombination operators.

use evoguard_core::{Genes, Genome};
use rand::seq::index;
use rand::Rng;

/// Tournament selection: sample `size` distinct members and return the
/// index of the fittest. Ties go to the first sampled. `None` when the
/// population is empty.
pub fn tournament_select<R: Rng + ?Sized>(population: &[Genome], size: usize, rng: &mut R) -> Option<usize> {
    if population.is_empty() {
        return None;
    }
    let size = size.clamp(1, population.len());
    index::sample(rng, population.len(), size)
        .into_iter()
        .fold(None, |best: Option<usize>, i| match best {
            Some(b) if population[b].fitness >= population[i].fitness => Some(b),
            _ => Some(i),
        })
}

/// Run `count` tournaments, returning the winners.
pub fn select_parents<R: Rng + ?Sized>(
    population: &[Genome],
    count: usize,
    tournament_size: usize,
    rng: &mut R,
) -> Vec<Genome> {
    (0..count)
        .filter_map(|_| tournament_select(population, tournament_size, rng))
        .map(|i| population[i].clone())
        .collect()
}

/// Single-point crossover after the first `split` genes.
///
/// The first child takes `a`'s genes before the split and `b`'s after,
/// the second the reverse. Both children record both parents. `None` when
/// the layouts differ or `split` is not strictly inside the gene list.
pub fn crossover_at(a: &Genome, b: &Genome, split: usize) -> Option<(Genome, Genome)> {
    if !a.genes.same_layout(&b.genes) || split == 0 || split >= a.genes.len() {
        return None;
    }

    let splice = |head: &Genes, tail: &Genes| -> Genes {
        head.iter()
            .take(split)
            .chain(tail.iter().skip(split))
            .map(|gene| (gene.name.clone(), gene.value.clone()))
            .collect()
    };

    let mut first = a.derive(splice(&a.genes, &b.genes));
    let mut second = b.derive(splice(&b.genes, &a.genes));
    first.parent_ids = vec![a.id, b.id];
    second.parent_ids = vec![b.id, a.id];
    Some((first, second))
}

/// Recombine two parents with probability `rate` at a random split point;
/// otherwise return unscored copies of them.
pub fn crossover<R: Rng + ?Sized>(a: &Genome, b: &Genome, rate: f64, rng: &mut R) -> (Genome, Genome) {
    let len = a.genes.len();
    if len >= 2 && a.genes.same_layout(&b.genes) && rng.gen_bool(rate.clamp(0.0, 1.0)) {
        let split = rng.gen_range(1..len);
        if let Some(children) = crossover_at(a, b, split) {
            return children;
        }
    }
    (a.derive(a.genes.clone()), b.derive(b.genes.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use evoguard_core::GeneValue;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn genome(learning_rate: f64, dropout: f64) -> Genome {
        Genome::new(
            Genes::new()
                .with("learning_rate", GeneValue::Float(learning_rate))
                .with("dropout", GeneValue::Float(dropout)),
        )
    }

    fn with_fitness(fitness: f64) -> Genome {
        let mut g = genome(0.01, 0.2);
        g.fitness = fitness;
        g
    }

    #[test]
    fn test_tournament_favours_fitter_members() {
        let population: Vec<Genome> = [0.9, 0.2, 0.5, 0.1].into_iter().map(with_fitness).collect();
        let mut rng = StdRng::seed_from_u64(7);
        let mut wins = [0usize; 4];
        for _ in 0..1000 {
            wins[tournament_select(&population, 2, &mut rng).unwrap()] += 1;
        }

        assert!(wins[0] > wins[3]);
        // the weakest member can never win a tournament of two
        assert_eq!(wins[3], 0);
        // the fittest wins whenever it is drawn: 1/2 of all pairs
        assert!(wins[0] > 400 && wins[0] < 600, "{:?}", wins);
    }

    #[test]
    fn test_tournament_edge_cases() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(tournament_select(&[], 3, &mut rng), None);

        let population = vec![with_fitness(0.3), with_fitness(0.6)];
        // oversized tournament covers the whole population
        assert_eq!(tournament_select(&population, 10, &mut rng), Some(1));
        assert_eq!(select_parents(&population, 5, 2, &mut rng).len(), 5);
    }

    #[test]
    fn test_crossover_at_swaps_tails() {
        let a = genome(0.01, 0.2);
        let b = genome(0.05, 0.4);

        let (first, second) = crossover_at(&a, &b, 1).unwrap();
        assert_eq!(first.genes.get_f64("learning_rate"), Some(0.01));
        assert_eq!(first.genes.get_f64("dropout"), Some(0.4));
        assert_eq!(second.genes.get_f64("learning_rate"), Some(0.05));
        assert_eq!(second.genes.get_f64("dropout"), Some(0.2));

        assert_eq!(first.fitness, 0.0);
        assert_eq!(first.parent_ids, vec![a.id, b.id]);
        assert_ne!(first.id, a.id);
        assert_eq!(a.genes.get_f64("dropout"), Some(0.2));
    }

    #[test]
    fn test_crossover_at_rejects_bad_split() {
        let a = genome(0.01, 0.2);
        let b = genome(0.05, 0.4);
        assert!(crossover_at(&a, &b, 0).is_none());
        assert!(crossover_at(&a, &b, 2).is_none());

        let other = Genome::new(Genes::new().with("dropout", GeneValue::Float(0.1)));
        assert!(crossover_at(&a, &other, 1).is_none());
    }

    #[test]
    fn test_crossover_rate_zero_copies_parents() {
        let a = genome(0.01, 0.2);
        let b = genome(0.05, 0.4);
        let mut rng = StdRng::seed_from_u64(3);
        let (first, second) = crossover(&a, &b, 0.0, &mut rng);
        assert_eq!(first.genes, a.genes);
        assert_eq!(second.genes, b.genes);
        assert_eq!(first.parent_ids, vec![a.id]);
    }
}
